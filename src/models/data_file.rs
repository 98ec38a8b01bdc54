use serde::{Deserialize, Serialize};

use super::DeletionState;

/// A single archived file belonging to an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    pub observation_id: i64,
    pub filename: String,
    pub file_type: i32,
    /// Storage location code
    pub location: i32,
    pub bucket: String,
    /// Key prefix inside the bucket, stored with its trailing separator
    pub folder: Option<String>,
    pub size_bytes: i64,
    /// Whether the file actually lives in remote storage
    pub remote_archived: bool,
    pub state: DeletionState,
}

impl DataFile {
    /// Key of the backing object: the folder and filename joined as-is.
    pub fn object_key(&self) -> ObjectKey {
        let key = match &self.folder {
            Some(folder) => format!("{}{}", folder, self.filename),
            None => self.filename.clone(),
        };
        ObjectKey {
            bucket: self.bucket.clone(),
            key,
        }
    }
}

/// Address of an object in a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}
