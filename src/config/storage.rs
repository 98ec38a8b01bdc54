use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Storage configuration: the static map from location code to backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Configured storage locations. Files whose location code is not
    /// listed here cannot be deleted.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for location in &self.locations {
            if !seen.insert(location.code) {
                return Err(format!(
                    "storage location code {} is configured more than once",
                    location.code
                ));
            }
            location
                .validate()
                .map_err(|e| format!("storage location {} ({}): {e}", location.code, location.name))?;
        }
        Ok(())
    }
}

/// A single storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    /// Location code as recorded on each data file.
    pub code: i32,

    /// Human-readable name used in logs.
    pub name: String,

    /// Seconds to wait after each batch at this location.
    /// Default: 0 (no pause)
    #[serde(default)]
    pub pause_after_batch_secs: u64,

    /// Backend serving this location.
    pub backend: LocationBackendConfig,
}

impl LocationConfig {
    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name cannot be empty".to_string());
        }
        self.backend.validate()
    }
}

/// Backend for a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum LocationBackendConfig {
    /// S3-compatible object storage (AWS S3, Ceph RGW, MinIO, ...).
    #[cfg(feature = "s3-storage")]
    S3(S3LocationConfig),

    /// Objects stored as plain files below a root directory.
    Filesystem(FilesystemLocationConfig),
}

impl LocationBackendConfig {
    fn validate(&self) -> Result<(), String> {
        match self {
            #[cfg(feature = "s3-storage")]
            LocationBackendConfig::S3(c) => c.validate(),
            LocationBackendConfig::Filesystem(c) => c.validate(),
        }
    }
}

/// S3-compatible object storage configuration.
///
/// Buckets are not configured here: each data file carries its own bucket.
#[cfg(feature = "s3-storage")]
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3LocationConfig {
    /// Region name. Ceph and other S3-compatible services accept any value.
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL, e.g. "https://acacia.pawsey.org.au".
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key ID.
    /// If not specified, uses environment variables or instance credentials.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use path-style URLs instead of virtual-hosted style.
    #[serde(default)]
    pub force_path_style: bool,
}

#[cfg(feature = "s3-storage")]
impl std::fmt::Debug for S3LocationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3LocationConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field(
                "access_key_id",
                &self.access_key_id.as_ref().map(|_| "****"),
            )
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "****"),
            )
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

#[cfg(feature = "s3-storage")]
impl S3LocationConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Region is required unless using a custom endpoint
        if self.region.is_none() && self.endpoint.is_none() {
            return Err("S3 requires either 'region' or 'endpoint' to be specified".to_string());
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(
                "S3 'access_key_id' and 'secret_access_key' must be set together".to_string(),
            );
        }
        Ok(())
    }
}

/// Local filesystem backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemLocationConfig {
    /// Root directory. Objects live at `{root}/{bucket}/{key}`.
    pub root: String,
}

impl FilesystemLocationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.root.is_empty() {
            return Err("filesystem root cannot be empty".to_string());
        }
        Ok(())
    }
}
