//! Object storage backends that hold the archived data files.
//!
//! Each storage location code in the catalogue maps to one backend:
//!
//! - **S3**: any S3-compatible service, deleted in bulk with `DeleteObjects`
//! - **Filesystem**: objects kept as plain files below a root directory
//! - **Dry run**: logs what would be removed and touches nothing
//!
//! A `bulk_delete` either succeeds for every key or fails as a whole. Keys
//! that no longer exist count as deleted, so a repeated call is harmless.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
#[cfg(feature = "s3-storage")]
use tracing::error;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "s3-storage")]
use crate::config::S3LocationConfig;
use crate::{
    config::{FilesystemLocationConfig, LocationBackendConfig, StorageConfig},
    models::ObjectKey,
};

/// Largest number of keys accepted by one S3 `DeleteObjects` call.
#[cfg(feature = "s3-storage")]
const S3_MAX_KEYS_PER_REQUEST: usize = 1000;

/// Errors that can occur while deleting objects.
///
/// Any error means the state of the keys in the failed call is unknown:
/// some objects may already be gone.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("{failed} object(s) in bucket {bucket} could not be deleted, first {first_key}: {reason}")]
    PartialFailure {
        bucket: String,
        failed: usize,
        first_key: String,
        reason: String,
    },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// A storage backend that can remove objects in bulk.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Delete every key. Missing objects are treated as deleted.
    async fn bulk_delete(&self, keys: &[ObjectKey]) -> ObjectStoreResult<()>;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Group keys by bucket, keeping the key order within each bucket.
fn group_by_bucket(keys: &[ObjectKey]) -> BTreeMap<&str, Vec<&str>> {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for key in keys {
        grouped
            .entry(key.bucket.as_str())
            .or_default()
            .push(key.key.as_str());
    }
    grouped
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem
// ─────────────────────────────────────────────────────────────────────────────

/// Filesystem backend.
///
/// Objects are stored as `{root}/{bucket}/{key}`.
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(config: &FilesystemLocationConfig) -> Self {
        Self {
            root: PathBuf::from(&config.root),
        }
    }

    /// Resolve an object to its path, refusing anything that would escape
    /// the root directory.
    fn object_path(&self, key: &ObjectKey) -> ObjectStoreResult<PathBuf> {
        let relative = Path::new(&key.bucket).join(&key.key);
        let confined = !key.bucket.is_empty()
            && !key.key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    #[instrument(skip(self, keys), fields(keys = keys.len(), root = %self.root.display()))]
    async fn bulk_delete(&self, keys: &[ObjectKey]) -> ObjectStoreResult<()> {
        // Resolve everything up front so a bad key deletes nothing
        let paths = keys
            .iter()
            .map(|k| self.object_path(k))
            .collect::<ObjectStoreResult<Vec<_>>>()?;

        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Object deleted"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Object already absent");
                }
                Err(e) => return Err(ObjectStoreError::Io(e)),
            }
        }

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// S3
// ─────────────────────────────────────────────────────────────────────────────

/// S3-compatible object storage backend.
///
/// The bucket is taken from each key, so one backend serves every bucket
/// reachable with its credentials.
///
/// Requires the `s3-storage` feature.
#[cfg(feature = "s3-storage")]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

#[cfg(feature = "s3-storage")]
impl S3ObjectStore {
    pub async fn new(config: &S3LocationConfig) -> ObjectStoreResult<Self> {
        info!(endpoint = ?config.endpoint, region = ?config.region, "Initializing S3 object store");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None, // session token
                None, // expiry
                "archive-purge-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        Ok(Self { client })
    }

    async fn delete_chunk(&self, bucket: &str, keys: &[&str]) -> ObjectStoreResult<()> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(*key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ObjectStoreError::S3(e.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| ObjectStoreError::S3(e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| {
                let detail = aws_sdk_s3::error::DisplayErrorContext(&e).to_string();
                error!(bucket, error = %detail, "DeleteObjects request failed");
                ObjectStoreError::S3(detail)
            })?;

        let failures: Vec<_> = output
            .errors()
            .iter()
            .filter(|e| e.code() != Some("NoSuchKey"))
            .collect();

        if let Some(first) = failures.first() {
            error!(
                bucket,
                failed = failures.len(),
                key = first.key().unwrap_or_default(),
                code = first.code().unwrap_or_default(),
                "DeleteObjects reported per-key errors"
            );
            return Err(ObjectStoreError::PartialFailure {
                bucket: bucket.to_string(),
                failed: failures.len(),
                first_key: first.key().unwrap_or_default().to_string(),
                reason: format!(
                    "{}: {}",
                    first.code().unwrap_or("Unknown"),
                    first.message().unwrap_or_default()
                ),
            });
        }

        Ok(())
    }
}

#[cfg(feature = "s3-storage")]
#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn bulk_delete(&self, keys: &[ObjectKey]) -> ObjectStoreResult<()> {
        for (bucket, bucket_keys) in group_by_bucket(keys) {
            for chunk in bucket_keys.chunks(S3_MAX_KEYS_PER_REQUEST) {
                debug!(bucket, keys = chunk.len(), "Deleting objects from S3");
                self.delete_chunk(bucket, chunk).await?;
            }
            info!(bucket, keys = bucket_keys.len(), "Objects deleted from S3");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dry run
// ─────────────────────────────────────────────────────────────────────────────

/// Stand-in backend for dry runs. Logs the keys and always succeeds.
pub struct DryRunObjectStore {
    location: String,
}

impl DryRunObjectStore {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for DryRunObjectStore {
    async fn bulk_delete(&self, keys: &[ObjectKey]) -> ObjectStoreResult<()> {
        for (bucket, bucket_keys) in group_by_bucket(keys) {
            info!(
                location = %self.location,
                bucket,
                keys = bucket_keys.len(),
                "Would delete objects (DRY RUN)"
            );
            for key in bucket_keys {
                debug!(bucket, key, "Would delete object (DRY RUN)");
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "dry-run"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Location registry
// ─────────────────────────────────────────────────────────────────────────────

/// A configured storage location.
#[derive(Clone)]
pub struct LocationBackend {
    pub name: String,
    pub store: Arc<dyn ObjectStore>,
    /// Pause after each batch at this location.
    pub pause_after_batch: Duration,
}

/// Static lookup from location code to backend, built once at startup.
#[derive(Clone, Default)]
pub struct StorageBackends {
    locations: HashMap<i32, LocationBackend>,
}

impl StorageBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        code: i32,
        name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        pause_after_batch: Duration,
    ) {
        self.locations.insert(
            code,
            LocationBackend {
                name: name.into(),
                store,
                pause_after_batch,
            },
        );
    }

    pub fn get(&self, code: i32) -> Option<&LocationBackend> {
        self.locations.get(&code)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// Build the backend for every configured location.
///
/// With `dry_run` set every location gets a [`DryRunObjectStore`] and no
/// client is created.
pub async fn create_storage_backends(
    config: &StorageConfig,
    dry_run: bool,
) -> ObjectStoreResult<StorageBackends> {
    let mut backends = StorageBackends::new();

    for location in &config.locations {
        let pause = Duration::from_secs(location.pause_after_batch_secs);

        let store: Arc<dyn ObjectStore> = if dry_run {
            Arc::new(DryRunObjectStore::new(location.name.clone()))
        } else {
            match &location.backend {
                #[cfg(feature = "s3-storage")]
                LocationBackendConfig::S3(s3) => Arc::new(S3ObjectStore::new(s3).await?),
                LocationBackendConfig::Filesystem(fs) => {
                    if !Path::new(&fs.root).is_dir() {
                        return Err(ObjectStoreError::Config(format!(
                            "filesystem root {} for location {} is not a directory",
                            fs.root, location.code
                        )));
                    }
                    Arc::new(FilesystemObjectStore::new(fs))
                }
            }
        };

        info!(
            code = location.code,
            name = %location.name,
            backend = store.backend_name(),
            "Configured storage location"
        );
        backends.insert(location.code, location.name.clone(), store, pause);
    }

    Ok(backends)
}
