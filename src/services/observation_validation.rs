//! Client for the archive web service that vets a request's observations
//! before anything is deleted.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{config::ValidationConfig, deletion::ObservationValidator};

#[derive(Serialize)]
struct ValidateBody<'a> {
    obsids: &'a [i64],
    with_reasons: bool,
}

/// Asks `POST {url}/validate_obsids` which observations are off limits.
///
/// The service answers with a JSON array of the ids that must be kept,
/// empty when the whole list may go.
pub struct ValidationService {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ValidationService {
    pub fn new(client: reqwest::Client, config: &ValidationConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/validate_obsids", config.url.trim_end_matches('/')),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl ObservationValidator for ValidationService {
    async fn invalid_observations(&self, observation_ids: &[i64]) -> Result<Vec<i64>, String> {
        if observation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&ValidateBody {
                obsids: observation_ids,
                with_reasons: false,
            })
            .send()
            .await
            .map_err(|e| format!("validation service unreachable: {e}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "validation service returned HTTP {}",
                response.status()
            ));
        }

        response
            .json::<Vec<i64>>()
            .await
            .map_err(|e| format!("unreadable validation response: {e}"))
    }
}
