use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TIFF encoding error: {0}")]
    TiffError(#[from] tiff::TiffError),

    #[error("NPY write error: {0}")]
    NpyWriteError(#[from] ndarray_npy::WriteNpyError),

    #[error("NPY read error: {0}")]
    NpyReadError(#[from] ndarray_npy::ReadNpyError),

    #[error("Image encoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Authentication failed: {message}")]
    AuthError { message: String },

    #[error("Provider returned HTTP {status}: {message}")]
    ProviderError { status: u16, message: String },

    #[error("No valid orbit for {tile}: {reason}")]
    NoValidOrbitError { tile: String, reason: String },

    #[error("No single acquisition date covers all {tiles} tiles")]
    NoCommonDateError { tiles: usize },

    #[error("Orbit selection strategy '{strategy}' is not implemented yet")]
    StrategyNotImplementedError { strategy: String },

    #[error("Unknown orbit selection strategy: {strategy}")]
    UnknownStrategyError { strategy: String },

    #[error("Partial data: tiles {missing:?} failed to download")]
    PartialDataError { missing: Vec<usize> },

    #[error("Stitching error: {message}")]
    StitchError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Provider,
    Selection,
    Data,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit status for a run that ended with this severity.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::UnknownStrategyError { .. }
            | EtlError::StrategyNotImplementedError { .. } => ErrorCategory::Configuration,
            EtlError::ApiError(_) => ErrorCategory::Network,
            EtlError::AuthError { .. } | EtlError::ProviderError { .. } => {
                ErrorCategory::Provider
            }
            EtlError::NoValidOrbitError { .. } | EtlError::NoCommonDateError { .. } => {
                ErrorCategory::Selection
            }
            EtlError::IoError(_) | EtlError::ZipError(_) => ErrorCategory::Storage,
            _ => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::ApiError(_) | EtlError::ProviderError { .. } => ErrorSeverity::Medium,
            EtlError::NoValidOrbitError { .. }
            | EtlError::NoCommonDateError { .. }
            | EtlError::PartialDataError { .. } => ErrorSeverity::Medium,
            EtlError::IoError(_) | EtlError::AuthError { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Whether a time-series run may skip the sub-job and keep going.
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            EtlError::NoValidOrbitError { .. } | EtlError::NoCommonDateError { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the profile file and command line arguments"
            }
            ErrorCategory::Network => "Check network connectivity and the provider base URL",
            ErrorCategory::Provider => match self {
                EtlError::AuthError { .. } => {
                    "Verify sh_client_id / sh_client_secret / sh_token_url in secrets.json"
                }
                _ => "The provider rejected the request; check request limits and quota",
            },
            ErrorCategory::Selection => {
                "Widen the time interval, raise cloud_cover_threshold or choose another strategy"
            }
            ErrorCategory::Storage => "Check disk space and permissions of the output directory",
            ErrorCategory::Data => match self {
                EtlError::PartialDataError { .. } => {
                    "Re-run the job; some tiles could not be downloaded"
                }
                _ => "Inspect the raw tiles and metadata in the job directory",
            },
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::AuthError { .. } => {
                "Could not authenticate with the imagery provider".to_string()
            }
            EtlError::ApiError(_) => "Could not reach the imagery provider".to_string(),
            EtlError::PartialDataError { missing } => format!(
                "Scene is incomplete: {} tile(s) failed to download",
                missing.len()
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
