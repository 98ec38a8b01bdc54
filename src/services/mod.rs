mod object_store;
mod observation_validation;

#[cfg(feature = "s3-storage")]
pub use object_store::S3ObjectStore;
pub use object_store::{
    DryRunObjectStore, FilesystemObjectStore, LocationBackend, ObjectStore, ObjectStoreError,
    ObjectStoreResult, StorageBackends, create_storage_backends,
};
pub use observation_validation::ValidationService;
