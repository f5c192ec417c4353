use crate::domain::model::{BBox, OrbitStrategy, TimeInterval, TimeSeriesMode};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_bbox, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_RESOLUTION: u32 = 10;
pub const DEFAULT_MAX_TILE_DIM: usize = 2500;
pub const DEFAULT_TILE_BUFFER: f64 = 0.95;

/// Top level of `profiles.toml`: a list of `[[profiles]]` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// Acquisition request for one area of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Lookup key used by `--profile`.
    pub name: String,
    pub region: String,
    pub bbox: BBox,
    pub time_interval: TimeInterval,
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    #[serde(default = "default_output_base_dir")]
    pub output_base_dir: String,
    #[serde(default = "default_cloud_cover_threshold")]
    pub cloud_cover_threshold: f64,
    #[serde(default = "default_strategy")]
    pub orbit_selection_strategy: String,
    #[serde(default)]
    pub time_series_mode: Option<TimeSeriesMode>,
    #[serde(default)]
    pub time_series_custom_intervals: Option<Vec<TimeInterval>>,
    #[serde(default = "default_max_tile_dim")]
    pub max_tile_dim: usize,
    #[serde(default = "default_tile_buffer")]
    pub tile_buffer: f64,
}

fn default_resolution() -> u32 {
    DEFAULT_RESOLUTION
}

fn default_output_base_dir() -> String {
    "outputs".to_string()
}

fn default_cloud_cover_threshold() -> f64 {
    100.0
}

fn default_strategy() -> String {
    OrbitStrategy::LeastCloud.as_str().to_string()
}

fn default_max_tile_dim() -> usize {
    DEFAULT_MAX_TILE_DIM
}

fn default_tile_buffer() -> f64 {
    DEFAULT_TILE_BUFFER
}

impl ProfilesFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn find(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| EtlError::ConfigError {
                message: format!(
                    "Profile '{}' not found. Available: {}",
                    name,
                    self.names().join(", ")
                ),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Replaces `${VAR}` with the environment value; unknown variables are left as-is.
fn substitute_env_vars(content: &str) -> Result<String> {
    use regex::Regex;
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
        message: format!("env substitution pattern: {}", e),
    })?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });

    Ok(result.to_string())
}

impl Profile {
    pub fn is_time_series(&self) -> bool {
        self.time_series_mode.is_some() || self.time_series_custom_intervals.is_some()
    }

    pub fn strategy(&self) -> Result<OrbitStrategy> {
        self.orbit_selection_strategy.parse()
    }
}

impl Validate for Profile {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("name", &self.name)?;
        validate_non_empty_string("region", &self.region)?;
        validate_bbox("bbox", &self.bbox.to_array())?;

        let (start, end) = self.time_interval;
        if start > end {
            return Err(EtlError::InvalidConfigValueError {
                field: "time_interval".to_string(),
                value: format!("{} .. {}", start, end),
                reason: "Start date is after end date".to_string(),
            });
        }
        if let Some(intervals) = &self.time_series_custom_intervals {
            for (s, e) in intervals {
                if s > e {
                    return Err(EtlError::InvalidConfigValueError {
                        field: "time_series_custom_intervals".to_string(),
                        value: format!("{} .. {}", s, e),
                        reason: "Start date is after end date".to_string(),
                    });
                }
            }
        }

        validate_positive_number("resolution", self.resolution as usize, 1)?;
        validate_path("output_base_dir", &self.output_base_dir)?;
        validate_range("cloud_cover_threshold", self.cloud_cover_threshold, 0.0, 100.0)?;
        validate_positive_number("max_tile_dim", self.max_tile_dim, 1)?;
        if !(self.tile_buffer > 0.0 && self.tile_buffer <= 1.0) {
            return Err(EtlError::InvalidConfigValueError {
                field: "tile_buffer".to_string(),
                value: self.tile_buffer.to_string(),
                reason: "Must be in (0, 1]".to_string(),
            });
        }

        // Not-implemented strategies are accepted here and rejected at selection time.
        self.strategy()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_profile() -> Profile {
    use chrono::NaiveDate;
    Profile {
        name: "test".to_string(),
        region: "Test Region".to_string(),
        bbox: BBox::new(172.5, -43.9, 172.6, -43.8),
        time_interval: (
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 1, 31).unwrap(),
        ),
        resolution: DEFAULT_RESOLUTION,
        output_base_dir: "outputs".to_string(),
        cloud_cover_threshold: 30.0,
        orbit_selection_strategy: "least_cloud".to_string(),
        time_series_mode: None,
        time_series_custom_intervals: None,
        max_tile_dim: DEFAULT_MAX_TILE_DIM,
        tile_buffer: DEFAULT_TILE_BUFFER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PROFILES: &str = r#"
[[profiles]]
name = "canterbury_monthly"
region = "Canterbury"
bbox = [172.548523, -43.931033, 173.194656, -43.570442]
time_interval = ["2022-01-01", "2022-12-31"]
cloud_cover_threshold = 30
orbit_selection_strategy = "best_per_tile"
time_series_mode = "monthly"

[[profiles]]
name = "quickview"
region = "Canterbury"
bbox = [172.548523, -43.931033, 173.194656, -43.570442]
time_interval = ["2023-01-01", "2023-01-15"]
"#;

    #[test]
    fn test_parse_profiles_with_defaults() {
        let file = ProfilesFile::from_toml_str(PROFILES).unwrap();
        assert_eq!(file.profiles.len(), 2);

        let monthly = file.find("canterbury_monthly").unwrap();
        assert!(monthly.is_time_series());
        assert_eq!(monthly.time_series_mode, Some(TimeSeriesMode::Monthly));
        assert_eq!(monthly.cloud_cover_threshold, 30.0);
        assert_eq!(monthly.strategy().unwrap(), OrbitStrategy::BestPerTile);

        let quick = file.find("quickview").unwrap();
        assert!(!quick.is_time_series());
        assert_eq!(quick.resolution, 10);
        assert_eq!(quick.output_base_dir, "outputs");
        assert_eq!(quick.max_tile_dim, 2500);
        assert_eq!(quick.tile_buffer, 0.95);
        assert_eq!(quick.cloud_cover_threshold, 100.0);
        assert_eq!(quick.strategy().unwrap(), OrbitStrategy::LeastCloud);
        assert_eq!(
            quick.time_interval.0,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        );
        assert!(quick.validate().is_ok());
    }

    #[test]
    fn test_unknown_profile_lists_available() {
        let file = ProfilesFile::from_toml_str(PROFILES).unwrap();
        let err = file.find("missing").unwrap_err();
        assert!(err.to_string().contains("canterbury_monthly"));
    }

    #[test]
    fn test_unknown_time_series_mode_is_rejected() {
        let toml = PROFILES.replace("\"monthly\"", "\"fortnightly\"");
        assert!(ProfilesFile::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SAT_ETL_TEST_OUTPUT", "/tmp/sat-outputs");
        let toml = r#"
[[profiles]]
name = "env"
region = "Env"
bbox = [0.0, 0.0, 0.1, 0.1]
time_interval = ["2022-01-01", "2022-01-02"]
output_base_dir = "${SAT_ETL_TEST_OUTPUT}"
"#;
        let file = ProfilesFile::from_toml_str(toml).unwrap();
        assert_eq!(file.profiles[0].output_base_dir, "/tmp/sat-outputs");
        std::env::remove_var("SAT_ETL_TEST_OUTPUT");
    }

    #[test]
    fn test_profile_validation() {
        let mut profile = sample_profile();
        assert!(profile.validate().is_ok());

        profile.time_interval = (profile.time_interval.1, profile.time_interval.0);
        assert!(profile.validate().is_err());

        let mut profile = sample_profile();
        profile.cloud_cover_threshold = 120.0;
        assert!(profile.validate().is_err());

        let mut profile = sample_profile();
        profile.orbit_selection_strategy = "random".to_string();
        assert!(matches!(
            profile.validate(),
            Err(EtlError::UnknownStrategyError { .. })
        ));

        let mut profile = sample_profile();
        profile.orbit_selection_strategy = "nearest_date".to_string();
        assert!(profile.validate().is_ok());

        let mut profile = sample_profile();
        profile.tile_buffer = 0.0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_profiles_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(PROFILES.as_bytes()).unwrap();

        let file = ProfilesFile::from_file(temp_file.path()).unwrap();
        assert_eq!(file.names(), vec!["canterbury_monthly", "quickview"]);
    }
}
