use std::{sync::Arc, time::Instant};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::{
    AllowAll, Batch, DeletionError, DeletionResult, FailureReport, NoProtectedObservations,
    ObservationValidator, PreDeleteCheck, RequestOutcome, RequestReport, RunSummary,
    plan_batches,
};
use crate::{
    config::DeletionConfig,
    db::{CatalogueRepo, CatalogueTx, DbError, DbResult},
    models::{DeletionRequest, FileScope, Observation},
    observability::metrics,
    services::{DryRunObjectStore, ObjectStore, StorageBackends},
};

/// Knobs for a deletion run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Maximum files per batch.
    pub batch_size: usize,
    /// Roll back every transaction and never call a real backend.
    pub dry_run: bool,
    /// File types kept by requests without a file-type filter.
    pub protected_file_types: Vec<i32>,
    /// Delete observations the validator flags instead of failing the request.
    pub force: bool,
}

impl From<&DeletionConfig> for EngineSettings {
    fn from(config: &DeletionConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            dry_run: config.dry_run,
            protected_file_types: config.protected_file_types.clone(),
            force: false,
        }
    }
}

/// A failure somewhere in the cascade, with the position it happened at.
#[derive(Debug)]
pub(super) struct StepError {
    pub error: DeletionError,
    pub observation_id: Option<i64>,
    pub location: Option<i32>,
    pub batch_index: Option<usize>,
}

impl StepError {
    fn in_batch(error: DeletionError, batch: &Batch) -> Self {
        Self {
            error,
            observation_id: None,
            location: Some(batch.location),
            batch_index: Some(batch.index),
        }
    }

    fn at_observation(mut self, observation_id: i64) -> Self {
        self.observation_id.get_or_insert(observation_id);
        self
    }
}

impl From<DeletionError> for StepError {
    fn from(error: DeletionError) -> Self {
        Self {
            error,
            observation_id: None,
            location: None,
            batch_index: None,
        }
    }
}

impl From<DbError> for StepError {
    fn from(error: DbError) -> Self {
        DeletionError::from(error).into()
    }
}

impl From<StepError> for FailureReport {
    fn from(step: StepError) -> Self {
        Self {
            observation_id: step.observation_id,
            location: step.location,
            batch_index: step.batch_index,
            error: step.error.to_string(),
        }
    }
}

/// Files and bytes removed while draining one observation.
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Progress {
    pub files_deleted: u64,
    pub bytes_deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ObservationOutcome {
    Deleted,
    /// Eligible files outside the request's scope are still pending
    Retained { remaining: u64 },
}

/// Drives the request → observation → batch cascade.
///
/// The engine keeps no state between runs; every decision is re-derived from
/// the catalogue, so a run can be repeated at any time.
pub struct DeletionEngine {
    pub(super) catalogue: Arc<dyn CatalogueRepo>,
    pub(super) backends: StorageBackends,
    pub(super) guard: Arc<dyn PreDeleteCheck>,
    pub(super) validator: Arc<dyn ObservationValidator>,
    pub(super) settings: EngineSettings,
    pub(super) shutdown: CancellationToken,
}

impl DeletionEngine {
    pub fn new(
        catalogue: Arc<dyn CatalogueRepo>,
        backends: StorageBackends,
        settings: EngineSettings,
    ) -> Self {
        Self {
            catalogue,
            backends,
            guard: Arc::new(AllowAll),
            validator: Arc::new(NoProtectedObservations),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Consult `guard` before every batch.
    pub fn with_guard(mut self, guard: Arc<dyn PreDeleteCheck>) -> Self {
        self.guard = guard;
        self
    }

    /// Vet each request's observations with `validator` before deleting.
    pub fn with_validator(mut self, validator: Arc<dyn ObservationValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Stop starting new batches once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(super) fn dry_run_msg(&self) -> &'static str {
        if self.settings.dry_run {
            " (DRY RUN)"
        } else {
            ""
        }
    }

    /// Files that must be gone before an observation counts as deleted.
    pub(super) fn eligible_scope(&self) -> FileScope {
        FileScope::AllExcept(self.settings.protected_file_types.clone())
    }

    /// Process every eligible request, oldest first.
    ///
    /// Only a failure to select the requests is returned as an error; a
    /// failing request is recorded in the summary and the run moves on.
    pub async fn run(&self, ids: Option<&[i64]>) -> DeletionResult<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("deletion_run", %run_id, dry_run = self.settings.dry_run);
        self.run_requests(run_id, ids).instrument(span).await
    }

    async fn run_requests(&self, run_id: Uuid, ids: Option<&[i64]>) -> DeletionResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(run_id, self.settings.dry_run);

        let requests = self.catalogue.list_eligible_requests(ids).await?;
        info!(
            requests = requests.len(),
            batch_size = self.settings.batch_size,
            "Found eligible deletion requests{}",
            self.dry_run_msg()
        );

        let total = requests.len();
        for (position, request) in requests.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                warn!(
                    remaining = total - position,
                    "Shutdown requested, not starting further requests"
                );
                summary.interrupted = true;
                break;
            }

            info!(
                request_id = request.id,
                "Processing deletion request ({}/{})",
                position + 1,
                total
            );
            let report = self.process_request(request).await;
            metrics::record_request(report.outcome.as_str());

            let failed = matches!(report.outcome, RequestOutcome::Failed(_));
            summary.requests.push(report);

            if failed && self.shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }
        }

        summary.finish();
        summary.log();
        metrics::record_run_duration(started.elapsed().as_secs_f64());
        Ok(summary)
    }

    async fn process_request(&self, request: &DeletionRequest) -> RequestReport {
        let mut report = RequestReport {
            request_id: request.id,
            file_type_filter: request.file_type_filter,
            observations_deleted: Vec::new(),
            files_deleted: 0,
            bytes_deleted: 0,
            outcome: RequestOutcome::Cancelled,
        };

        let outcome = match self.cascade_request(request, &mut report).await {
            Ok(outcome) => outcome,
            Err(step) => {
                warn!(
                    request_id = request.id,
                    observation_id = ?step.observation_id,
                    location = ?step.location,
                    batch_index = ?step.batch_index,
                    error = %step.error,
                    "Deletion request failed{}",
                    self.dry_run_msg()
                );
                RequestOutcome::Failed(step.into())
            }
        };

        report.outcome = outcome;
        report
    }

    async fn cascade_request(
        &self,
        request: &DeletionRequest,
        report: &mut RequestReport,
    ) -> Result<RequestOutcome, StepError> {
        if !self.still_pending(request.id).await? {
            info!(request_id = request.id, "Request no longer pending, skipping");
            return Ok(RequestOutcome::Cancelled);
        }

        let scope = request.file_scope(&self.settings.protected_file_types);
        let observations = self.catalogue.list_undeleted_observations(request.id).await?;
        info!(
            request_id = request.id,
            observations = observations.len(),
            file_type_filter = ?request.file_type_filter,
            "Request has undeleted observations"
        );
        self.validate_observations(request.id, &observations).await?;

        let mut retained = Vec::new();
        for (position, observation) in observations.iter().enumerate() {
            if position > 0 && !self.still_pending(request.id).await? {
                info!(
                    request_id = request.id,
                    "Request cancelled while processing, stopping"
                );
                return Ok(RequestOutcome::Cancelled);
            }

            let mut progress = Progress::default();
            let outcome = self
                .drain_observation(observation.id, &scope, &mut progress)
                .await;
            report.files_deleted += progress.files_deleted;
            report.bytes_deleted += progress.bytes_deleted;

            match outcome.map_err(|e| e.at_observation(observation.id))? {
                ObservationOutcome::Deleted => report.observations_deleted.push(observation.id),
                ObservationOutcome::Retained { remaining } => {
                    info!(
                        request_id = request.id,
                        observation_id = observation.id,
                        remaining,
                        "Observation keeps files outside the request scope, not marking deleted"
                    );
                    retained.push(observation.id);
                }
            }
        }

        if !retained.is_empty() {
            return Ok(RequestOutcome::Incomplete { retained });
        }

        let mut tx = self.catalogue.begin().await?;
        let actioned = tx.mark_request_actioned(request.id).await?;
        self.finish(tx).await?;

        if !actioned {
            warn!(
                request_id = request.id,
                "Request stopped being pending before it could be marked actioned"
            );
            return Ok(RequestOutcome::Cancelled);
        }

        info!(
            request_id = request.id,
            observations = report.observations_deleted.len(),
            files = report.files_deleted,
            "Request actioned{}",
            self.dry_run_msg()
        );
        Ok(RequestOutcome::Actioned)
    }

    async fn validate_observations(
        &self,
        request_id: i64,
        observations: &[Observation],
    ) -> DeletionResult<()> {
        let ids: Vec<i64> = observations.iter().map(|o| o.id).collect();
        let invalid = self
            .validator
            .invalid_observations(&ids)
            .await
            .map_err(DeletionError::Validation)?;

        if invalid.is_empty() {
            return Ok(());
        }
        if !self.settings.force {
            return Err(DeletionError::ProtectedObservations(invalid));
        }

        warn!(
            request_id,
            observations = ?invalid,
            "Request contains protected observations, deleting them because force is set"
        );
        Ok(())
    }

    async fn still_pending(&self, request_id: i64) -> DbResult<bool> {
        Ok(self
            .catalogue
            .get_request(request_id)
            .await?
            .is_some_and(|r| r.state.is_pending()))
    }

    /// Delete every pending file of `observation_id` within `scope`, then mark
    /// the observation deleted if none of its eligible files remain.
    pub(super) async fn drain_observation(
        &self,
        observation_id: i64,
        scope: &FileScope,
        progress: &mut Progress,
    ) -> Result<ObservationOutcome, StepError> {
        let files = self
            .catalogue
            .list_pending_files(observation_id, None, scope)
            .await?;

        let eligible = self.eligible_scope();
        let planned_eligible = files
            .iter()
            .filter(|f| eligible.includes(f.file_type))
            .count() as u64;

        let batches = plan_batches(files, self.settings.batch_size);
        info!(
            observation_id,
            files = batches.iter().map(Batch::len).sum::<usize>(),
            batches = batches.len(),
            "Processing observation{}",
            self.dry_run_msg()
        );

        for (position, batch) in batches.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                return Err(StepError::in_batch(DeletionError::Interrupted, batch));
            }

            self.delete_batch(batch)
                .await
                .map_err(|e| StepError::in_batch(e, batch))?;
            progress.files_deleted += batch.len() as u64;
            progress.bytes_deleted += batch.total_bytes();

            if position + 1 < batches.len() {
                self.pause_after(batch.location).await;
            }
        }

        let mut remaining = self
            .catalogue
            .count_pending_files(observation_id, &eligible)
            .await?;
        if self.settings.dry_run {
            // Nothing was committed, so discount what this run would have removed
            remaining = remaining.saturating_sub(planned_eligible);
        }
        if remaining > 0 {
            return Ok(ObservationOutcome::Retained { remaining });
        }

        let mut tx = self.catalogue.begin().await?;
        let marked = tx.mark_observation_deleted(observation_id).await?;
        self.finish(tx).await?;

        if marked {
            info!(observation_id, "Observation deleted{}", self.dry_run_msg());
        } else {
            debug!(observation_id, "Observation was already marked deleted");
        }
        Ok(ObservationOutcome::Deleted)
    }

    /// Run one batch: mark its files deleted, remove the objects, and commit
    /// only if the backend call succeeded.
    pub(super) async fn delete_batch(&self, batch: &Batch) -> DeletionResult<()> {
        let backend = self
            .backends
            .get(batch.location)
            .ok_or(DeletionError::UnknownLocation(batch.location))?;

        if let Err(reason) = self.guard.check(batch).await {
            metrics::record_batch(&backend.name, "rejected");
            return Err(DeletionError::Rejected {
                location: batch.location,
                reason,
            });
        }

        let keys = batch.object_keys();
        let mut tx = self.catalogue.begin().await?;
        let marked = tx.mark_files_deleted(&batch.files).await?;

        let deleted = if self.settings.dry_run {
            DryRunObjectStore::new(backend.name.clone())
                .bulk_delete(&keys)
                .await
        } else {
            backend.store.bulk_delete(&keys).await
        };

        if let Err(source) = deleted {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback after backend failure did not complete");
            }
            metrics::record_batch(&backend.name, "failed");
            return Err(DeletionError::Backend {
                location: batch.location,
                source,
            });
        }

        if self.settings.dry_run {
            tx.rollback().await?;
            metrics::record_batch(&backend.name, "dry_run");
        } else {
            tx.commit().await?;
            metrics::record_batch(&backend.name, "committed");
            metrics::record_files_deleted(&backend.name, batch.len() as u64, batch.total_bytes());
        }

        info!(
            location = %backend.name,
            batch_index = batch.index,
            files = batch.len(),
            marked,
            bytes = batch.total_bytes(),
            "Batch deleted{}",
            self.dry_run_msg()
        );
        Ok(())
    }

    /// Commit, or roll back in dry-run mode.
    async fn finish(&self, mut tx: Box<dyn CatalogueTx>) -> DbResult<()> {
        if self.settings.dry_run {
            tx.rollback().await
        } else {
            tx.commit().await
        }
    }

    async fn pause_after(&self, location: i32) {
        let Some(backend) = self.backends.get(location) else {
            return;
        };
        if self.settings.dry_run || backend.pause_after_batch.is_zero() {
            return;
        }

        info!(
            location = %backend.name,
            seconds = backend.pause_after_batch.as_secs(),
            "Pausing before next batch"
        );
        tokio::select! {
            _ = tokio::time::sleep(backend.pause_after_batch) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}
