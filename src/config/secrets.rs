use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_url, Validate};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Provider credentials loaded from `secrets.json`.
#[derive(Clone, Deserialize)]
pub struct Secrets {
    pub sh_client_id: String,
    pub sh_client_secret: String,
    pub sh_base_url: String,
    pub sh_token_url: String,
}

impl Secrets {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| EtlError::ConfigError {
            message: format!("Cannot read secrets file {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| EtlError::ConfigValidationError {
            field: "secrets".to_string(),
            message: format!("JSON parsing error: {}", e),
        })
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("sh_client_id", &self.sh_client_id)
            .field("sh_client_secret", &"***")
            .field("sh_base_url", &self.sh_base_url)
            .field("sh_token_url", &self.sh_token_url)
            .finish()
    }
}

impl Validate for Secrets {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("sh_client_id", &self.sh_client_id)?;
        validate_non_empty_string("sh_client_secret", &self.sh_client_secret)?;
        validate_url("sh_base_url", &self.sh_base_url)?;
        validate_url("sh_token_url", &self.sh_token_url)?;
        Ok(())
    }
}
