use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Largest batch a single S3 `DeleteObjects` call accepts.
pub const MAX_BATCH_SIZE: usize = 1000;

/// File type of the metafits PPD, which an unfiltered request never removes.
pub const METAFITS_PPD_FILE_TYPE: i32 = 14;

/// Deletion run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeletionConfig {
    /// Maximum files per backend call and catalogue transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Plan and log every batch but roll back all catalogue changes and
    /// leave the backends untouched.
    #[serde(default)]
    pub dry_run: bool,

    /// File types that are kept when a request has no file-type filter.
    #[serde(default = "default_protected_file_types")]
    pub protected_file_types: Vec<i32>,

    /// Seconds between runs in watch mode.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Web service that flags observations which must never be deleted.
    /// Without it every observation is treated as deletable.
    #[serde(default)]
    pub validation: Option<ValidationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    /// Base URL; `/validate_obsids` is appended.
    pub url: String,

    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            dry_run: false,
            protected_file_types: default_protected_file_types(),
            interval_secs: default_interval_secs(),
            validation: None,
        }
    }
}

impl DeletionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Validation(format!(
                "deletion.batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "deletion.interval_secs must be greater than zero".into(),
            ));
        }
        if let Some(validation) = &self.validation
            && !(validation.url.starts_with("http://") || validation.url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "deletion.validation.url must be an http(s) URL, got '{}'",
                validation.url
            )));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_protected_file_types() -> Vec<i32> {
    vec![METAFITS_PPD_FILE_TYPE]
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_validation_timeout_secs() -> u64 {
    30
}
