use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a deletion request.
///
/// The catalogue stores this as two nullable timestamps. A request that is
/// both cancelled and actioned cannot be represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestState {
    /// Waiting to be processed
    Pending,
    /// Withdrawn by an operator; never processed again
    Cancelled { at: DateTime<Utc> },
    /// Every linked observation has been deleted
    Actioned { at: DateTime<Utc> },
}

impl RequestState {
    /// Build the state from the stored `cancelled_at` / `actioned_at` columns.
    pub fn from_timestamps(
        cancelled_at: Option<DateTime<Utc>>,
        actioned_at: Option<DateTime<Utc>>,
    ) -> Result<Self, String> {
        match (cancelled_at, actioned_at) {
            (None, None) => Ok(RequestState::Pending),
            (Some(at), None) => Ok(RequestState::Cancelled { at }),
            (None, Some(at)) => Ok(RequestState::Actioned { at }),
            (Some(_), Some(_)) => Err("request is both cancelled and actioned".to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RequestState::Pending)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Pending => write!(f, "pending"),
            RequestState::Cancelled { .. } => write!(f, "cancelled"),
            RequestState::Actioned { .. } => write!(f, "actioned"),
        }
    }
}

/// An operator-submitted request to purge a set of observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Restricts the purge to a single file type when set
    pub file_type_filter: Option<i32>,
    pub state: RequestState,
}

impl DeletionRequest {
    /// Resolve which files of each observation this request targets.
    pub fn file_scope(&self, protected_file_types: &[i32]) -> FileScope {
        FileScope::resolve(self.file_type_filter, protected_file_types)
    }
}

/// Which file types of an observation are in play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileScope {
    /// Only files of this type
    Only(i32),
    /// All files except the listed (protected) types
    AllExcept(Vec<i32>),
}

impl FileScope {
    pub fn resolve(file_type_filter: Option<i32>, protected_file_types: &[i32]) -> Self {
        match file_type_filter {
            Some(file_type) => FileScope::Only(file_type),
            None => FileScope::AllExcept(protected_file_types.to_vec()),
        }
    }

    pub fn includes(&self, file_type: i32) -> bool {
        match self {
            FileScope::Only(t) => *t == file_type,
            FileScope::AllExcept(excluded) => !excluded.contains(&file_type),
        }
    }
}
