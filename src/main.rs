use clap::Parser;
use sat_etl::adapters::archive::{
    archive_job_outputs, clean_all_outputs, format_metadata_summary, view_run,
};
use sat_etl::config::cli::{ArchiveArgs, CleanArgs, Command, JobArgs, ViewArgs};
use sat_etl::config::{Profile, ProfilesFile, Secrets};
use sat_etl::core::job::Job;
use sat_etl::core::postprocess::ndvi_stats;
use sat_etl::core::tiling::generate_safe_tiles;
use sat_etl::core::time_intervals::create_timeseries_jobs;
use sat_etl::utils::{logger, validation::Validate};
use sat_etl::{
    AcquisitionPipeline, CliConfig, EtlEngine, EtlError, LocalStorage, Result,
    SentinelHubClient, TimeSeriesRunner,
};
use std::path::Path;
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = CliConfig::parse();

    if config.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting sat-etl");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }
    if config.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let result = match &config.command {
        Command::Run(args) => run_single(args, config.monitor).await,
        Command::Timeseries(args) => run_timeseries(args, config.monitor).await,
        Command::View(args) => view(args),
        Command::Archive(args) => archive(args),
        Command::Clean(args) => clean(args),
    };

    if let Err(e) = result {
        tracing::error!(
            "❌ sat-etl failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

        std::process::exit(e.severity().exit_code());
    }
}

fn load_profile(args: &JobArgs) -> Result<Profile> {
    let profiles = ProfilesFile::from_file(&args.profiles)?;
    let profile = profiles.find(&args.profile)?.clone();
    profile.validate()?;
    Ok(profile)
}

fn load_client(args: &JobArgs) -> Result<Arc<SentinelHubClient>> {
    let secrets = Secrets::from_file(&args.secrets)?;
    secrets.validate()?;
    Ok(Arc::new(SentinelHubClient::new(secrets)))
}

fn print_plan(jobs: &[Job]) -> Result<()> {
    for job in jobs {
        let profile = &job.profile;
        let tiles = generate_safe_tiles(
            &profile.bbox,
            profile.resolution,
            profile.max_tile_dim,
            profile.tile_buffer,
        )?;
        println!(
            "🗓️ {} ({} to {}): {} tiles, strategy {}, cloud <= {}%",
            job.job_id,
            job.time_interval.0,
            job.time_interval.1,
            tiles.len(),
            profile.orbit_selection_strategy,
            profile.cloud_cover_threshold
        );
        for tile in &tiles {
            println!(
                "   tile{} r{} c{}: {}x{} px {:?}",
                tile.index,
                tile.row,
                tile.col,
                tile.width,
                tile.height,
                tile.bbox.to_array()
            );
        }
    }
    Ok(())
}

async fn run_single(args: &JobArgs, monitor: bool) -> Result<()> {
    let profile = load_profile(args)?;
    // Rejects unknown strategy names before any request.
    profile.strategy()?;
    let job = Job::from_profile(&profile);

    if args.dry_run {
        return print_plan(std::slice::from_ref(&job));
    }

    let storage = LocalStorage::new(profile.output_base_dir.clone());
    let pipeline = AcquisitionPipeline::new(storage, load_client(args)?, job);
    let engine = EtlEngine::new_with_monitoring(pipeline, monitor);

    let report = engine.run().await?;
    tracing::info!("✅ Acquisition completed successfully!");
    println!("✅ Acquisition completed successfully!");
    println!("📁 Output saved to: {}", report.output_path);
    println!(
        "🛰️ Orbit dates: {} ({:.2}% mean cloud)",
        report.orbit_dates.join(", "),
        report.cloud_coverage
    );
    if let Some(mean) = report.mean_ndvi {
        println!("🌿 Mean NDVI: {:.3}", mean);
    }
    if let Some(peak) = report.peak_memory_mb {
        println!("📊 Peak memory: {}MB", peak);
    }
    Ok(())
}

async fn run_timeseries(args: &JobArgs, monitor: bool) -> Result<()> {
    let profile = load_profile(args)?;
    if !profile.is_time_series() {
        return Err(EtlError::ConfigError {
            message: format!(
                "Profile '{}' has no time_series_mode or time_series_custom_intervals",
                profile.name
            ),
        });
    }
    profile.strategy()?;

    if args.dry_run {
        return print_plan(&create_timeseries_jobs(&profile)?);
    }

    let storage = LocalStorage::new(profile.output_base_dir.clone());
    let runner =
        TimeSeriesRunner::new(storage, load_client(args)?, profile).with_monitoring(monitor);
    let summary = runner.run().await?;

    println!("✅ Time series {} finished", summary.parent_job_id);
    for outcome in &summary.outcomes {
        let detail = match (&outcome.report, &outcome.error) {
            (Some(report), _) => format!(
                "{} | NDVI {}",
                report.orbit_dates.join(", "),
                report
                    .mean_ndvi
                    .map(|m| format!("{:.3}", m))
                    .unwrap_or_else(|| "n/a".to_string())
            ),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        println!("   {:?} {}: {}", outcome.status, outcome.job_id, detail);
    }
    Ok(())
}

fn view(args: &ViewArgs) -> Result<()> {
    let run = view_run(
        Path::new(&args.outputs),
        args.archive.as_deref(),
        Path::new(&args.archive_dir),
    )?;

    println!(
        "🔎 {} frame(s){}",
        run.frames.len(),
        if run.is_timeseries { " (time series)" } else { "" }
    );
    for frame in &run.frames {
        let stats = ndvi_stats(&frame.ndvi);
        println!("\n== {} ==", frame.label);
        if let Some(bbox) = frame.bbox {
            println!("BBox: {:?}", bbox.to_array());
        }
        println!(
            "NDVI: {}/{} valid px, mean {}, min {}, max {}",
            stats.valid_pixels,
            stats.total_pixels,
            fmt_opt(stats.mean),
            fmt_opt(stats.min.map(f64::from)),
            fmt_opt(stats.max.map(f64::from))
        );
        if let Some(rgb) = &frame.true_color {
            println!("True color: {:?}", rgb.dim());
        }
        println!("{}", format_metadata_summary(&frame.metadata_summary));
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn archive(args: &ArchiveArgs) -> Result<()> {
    let zip_path = archive_job_outputs(
        args.from_dir.as_deref().map(Path::new),
        Path::new(&args.outputs),
        args.label.as_deref(),
        Path::new(&args.archive_dir),
    )?;
    println!("📦 Archive written to: {}", zip_path.display());
    Ok(())
}

fn clean(args: &CleanArgs) -> Result<()> {
    let report = clean_all_outputs(Path::new(&args.outputs))?;
    println!(
        "🧹 Removed {} directories and {} files from {}",
        report.dirs_removed, report.files_removed, args.outputs
    );
    Ok(())
}
