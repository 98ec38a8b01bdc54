//! The deletion cascade: requests, then observations, then batches of files.
//!
//! Every batch binds the catalogue update and the backend delete call into
//! one transaction, so a file is only ever marked deleted once its object is
//! gone. All progress lives in the catalogue, which makes a run safe to
//! repeat after any failure.

mod engine;
mod guard;
mod planner;
mod single;
mod summary;

#[cfg(all(test, feature = "database-sqlite"))]
mod tests;

pub use engine::{DeletionEngine, EngineSettings};
pub use guard::{AllowAll, DenyFiles, NoProtectedObservations, ObservationValidator, PreDeleteCheck};
pub use planner::{Batch, plan_batches};
pub use single::{SingleFileOutcome, SingleObservationOutcome};
pub use summary::{FailureReport, RequestOutcome, RequestReport, RunSummary};
use thiserror::Error;

use crate::{db::DbError, services::ObjectStoreError};

#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("Catalogue error: {0}")]
    Catalogue(#[from] DbError),

    #[error("Storage location {location}: {source}")]
    Backend {
        location: i32,
        #[source]
        source: ObjectStoreError,
    },

    #[error("No storage backend configured for location {0}")]
    UnknownLocation(i32),

    #[error("Pre-delete check rejected a batch at location {location}: {reason}")]
    Rejected { location: i32, reason: String },

    #[error("Observation validation failed: {0}")]
    Validation(String),

    #[error("Request contains observations that must not be deleted: {0:?} (use --force to override)")]
    ProtectedObservations(Vec<i64>),

    #[error("Interrupted by shutdown")]
    Interrupted,
}

pub type DeletionResult<T> = Result<T, DeletionError>;
