use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{DataFile, DeletionRequest, FileScope, Observation},
};

/// Read access to the archive catalogue plus scoped transactions for the
/// deletion marks.
#[async_trait]
pub trait CatalogueRepo: Send + Sync {
    /// Approved requests that are neither cancelled nor actioned, oldest
    /// first.
    ///
    /// When `ids` is given, only those requests are considered; ids that are
    /// unknown, unapproved or no longer pending are silently skipped.
    async fn list_eligible_requests(&self, ids: Option<&[i64]>) -> DbResult<Vec<DeletionRequest>>;

    async fn get_request(&self, id: i64) -> DbResult<Option<DeletionRequest>>;

    /// Observations linked to the request that are not yet deleted, by id.
    async fn list_undeleted_observations(&self, request_id: i64) -> DbResult<Vec<Observation>>;

    async fn get_observation(&self, id: i64) -> DbResult<Option<Observation>>;

    /// Undeleted, remote-archived files of an observation within `scope`,
    /// ordered by filename. `location` narrows the result to one backend.
    async fn list_pending_files(
        &self,
        observation_id: i64,
        location: Option<i32>,
        scope: &FileScope,
    ) -> DbResult<Vec<DataFile>>;

    /// Number of files `list_pending_files` would return for all locations.
    async fn count_pending_files(&self, observation_id: i64, scope: &FileScope) -> DbResult<u64>;

    async fn get_file(&self, observation_id: i64, filename: &str) -> DbResult<Option<DataFile>>;

    /// Open a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> DbResult<Box<dyn CatalogueTx>>;
}

/// Writes made inside a catalogue transaction.
///
/// Every mark is idempotent: rows that already carry the mark are left
/// untouched and do not count as changed.
#[async_trait]
pub trait CatalogueTx: Send {
    /// Mark files deleted, returning the number of rows changed.
    async fn mark_files_deleted(&mut self, files: &[DataFile]) -> DbResult<u64>;

    /// Returns false when the observation was already deleted.
    async fn mark_observation_deleted(&mut self, observation_id: i64) -> DbResult<bool>;

    /// Returns false when the request was already actioned or is cancelled.
    async fn mark_request_actioned(&mut self, request_id: i64) -> DbResult<bool>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;
}
