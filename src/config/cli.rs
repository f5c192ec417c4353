use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "sat-etl")]
#[command(about = "Sentinel-2 acquisition, stitching and NDVI tool")]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log process CPU/memory per phase")]
    pub monitor: bool,

    #[arg(long, global = true, help = "Emit JSON log lines")]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Acquire one scene for the whole profile interval.
    Run(JobArgs),
    /// Acquire one scene per sub-interval of a time-series profile.
    Timeseries(JobArgs),
    /// Summarise a run directory or archive.
    View(ViewArgs),
    /// Zip a run directory.
    Archive(ArchiveArgs),
    /// Remove generated outputs.
    Clean(CleanArgs),
}

#[derive(Debug, Clone, Args)]
pub struct JobArgs {
    #[arg(short, long)]
    pub profile: String,

    #[arg(long, default_value = "profiles.toml")]
    pub profiles: String,

    #[arg(long, default_value = "secrets.json")]
    pub secrets: String,

    #[arg(long, help = "Print the planned jobs and tiles without calling the provider")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ViewArgs {
    #[arg(long, help = "Archive name (with or without .zip) or run directory")]
    pub archive: Option<String>,

    #[arg(long, default_value = "outputs")]
    pub outputs: String,

    #[arg(long, default_value = "archive")]
    pub archive_dir: String,
}

#[derive(Debug, Clone, Args)]
pub struct ArchiveArgs {
    #[arg(long, help = "Run directory to archive (default: most recent under --outputs)")]
    pub from_dir: Option<String>,

    #[arg(long)]
    pub label: Option<String>,

    #[arg(long, default_value = "outputs")]
    pub outputs: String,

    #[arg(long, default_value = "archive")]
    pub archive_dir: String,
}

#[derive(Debug, Clone, Args)]
pub struct CleanArgs {
    #[arg(long, default_value = "outputs")]
    pub outputs: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_subcommand() {
        let cli = CliConfig::try_parse_from([
            "sat-etl",
            "run",
            "--profile",
            "quickview",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.profile, "quickview");
                assert_eq!(args.profiles, "profiles.toml");
                assert_eq!(args.secrets, "secrets.json");
                assert!(!args.dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_archive_defaults() {
        let cli = CliConfig::try_parse_from(["sat-etl", "archive", "--label", "jan"]).unwrap();
        match cli.command {
            Command::Archive(args) => {
                assert_eq!(args.label.as_deref(), Some("jan"));
                assert_eq!(args.outputs, "outputs");
                assert_eq!(args.archive_dir, "archive");
                assert!(args.from_dir.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_profile_is_required_for_run() {
        assert!(CliConfig::try_parse_from(["sat-etl", "run"]).is_err());
    }
}
