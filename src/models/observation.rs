use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deletion state shared by observations and data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeletionState {
    Pending,
    Deleted { at: DateTime<Utc> },
}

impl DeletionState {
    pub fn from_timestamp(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(at) => DeletionState::Deleted { at },
            None => DeletionState::Pending,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DeletionState::Deleted { .. })
    }
}

/// A data-collection session; keyed by its start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub state: DeletionState,
}
