//! Operator utilities that delete one file or one observation outside any
//! deletion request.

use serde::Serialize;
use tracing::{info, instrument};

use super::{
    Batch, DeletionEngine, DeletionResult,
    engine::{ObservationOutcome, Progress},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleFileOutcome {
    Deleted,
    NotFound,
    AlreadyDeleted,
    /// The file only exists locally, so there is nothing to remove remotely
    NotRemoteArchived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SingleObservationOutcome {
    Deleted { files: u64 },
    /// Files were removed but eligible ones are still pending
    Retained { remaining: u64 },
    NotFound,
    AlreadyDeleted,
}

impl DeletionEngine {
    /// Delete one file through the same transaction protocol as a batch.
    #[instrument(skip(self), fields(dry_run = self.settings.dry_run))]
    pub async fn delete_single_file(
        &self,
        observation_id: i64,
        filename: &str,
    ) -> DeletionResult<SingleFileOutcome> {
        let Some(file) = self.catalogue.get_file(observation_id, filename).await? else {
            info!("File not found in catalogue");
            return Ok(SingleFileOutcome::NotFound);
        };
        if file.state.is_deleted() {
            info!("File already deleted");
            return Ok(SingleFileOutcome::AlreadyDeleted);
        }
        if !file.remote_archived {
            info!("File is not remote archived, nothing to delete");
            return Ok(SingleFileOutcome::NotRemoteArchived);
        }

        let batch = Batch {
            location: file.location,
            index: 0,
            files: vec![file],
        };
        self.delete_batch(&batch).await?;
        Ok(SingleFileOutcome::Deleted)
    }

    /// Drain one observation of every unprotected file and mark it deleted.
    ///
    /// Linked deletion requests are left alone; the next run notices the
    /// observation is gone and actions them.
    #[instrument(skip(self), fields(dry_run = self.settings.dry_run))]
    pub async fn delete_single_observation(
        &self,
        observation_id: i64,
    ) -> DeletionResult<SingleObservationOutcome> {
        let Some(observation) = self.catalogue.get_observation(observation_id).await? else {
            info!("Observation not found in catalogue");
            return Ok(SingleObservationOutcome::NotFound);
        };
        if observation.state.is_deleted() {
            info!("Observation already deleted");
            return Ok(SingleObservationOutcome::AlreadyDeleted);
        }

        let scope = self.eligible_scope();
        let mut progress = Progress::default();
        let outcome = self
            .drain_observation(observation_id, &scope, &mut progress)
            .await
            .map_err(|step| step.error)?;

        Ok(match outcome {
            ObservationOutcome::Deleted => SingleObservationOutcome::Deleted {
                files: progress.files_deleted,
            },
            ObservationOutcome::Retained { remaining } => {
                SingleObservationOutcome::Retained { remaining }
            }
        })
    }
}
