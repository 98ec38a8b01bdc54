use async_trait::async_trait;

use super::Batch;

/// Safety check consulted before any delete call is issued.
///
/// Used to plug in an external verdict, such as a checksum verifier that
/// flags incomplete files. A rejection fails the batch exactly like a
/// backend error: nothing in it is deleted or marked.
#[async_trait]
pub trait PreDeleteCheck: Send + Sync {
    async fn check(&self, batch: &Batch) -> Result<(), String>;
}

/// Accepts every batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PreDeleteCheck for AllowAll {
    async fn check(&self, _batch: &Batch) -> Result<(), String> {
        Ok(())
    }
}

/// Rejects batches that contain any of the listed filenames.
#[derive(Debug, Default, Clone)]
pub struct DenyFiles {
    filenames: Vec<String>,
}

impl DenyFiles {
    pub fn new(filenames: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            filenames: filenames.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PreDeleteCheck for DenyFiles {
    async fn check(&self, batch: &Batch) -> Result<(), String> {
        match batch
            .files
            .iter()
            .find(|f| self.filenames.contains(&f.filename))
        {
            Some(file) => Err(format!(
                "{} of observation {} is flagged incomplete",
                file.filename, file.observation_id
            )),
            None => Ok(()),
        }
    }
}

/// Request-level check run once before any of a request's observations is
/// touched.
///
/// Returns the ids that must not be deleted, such as calibrators or
/// observations that belong to a published collection. An `Err` means no
/// verdict could be reached; the request fails and is retried next run.
#[async_trait]
pub trait ObservationValidator: Send + Sync {
    async fn invalid_observations(&self, observation_ids: &[i64]) -> Result<Vec<i64>, String>;
}

/// Treats every observation as deletable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProtectedObservations;

#[async_trait]
impl ObservationValidator for NoProtectedObservations {
    async fn invalid_observations(&self, _observation_ids: &[i64]) -> Result<Vec<i64>, String> {
        Ok(Vec::new())
    }
}

