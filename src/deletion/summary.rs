//! Per-run report: what each request reached and where it stopped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Where and why a request stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Observation being processed when the failure happened
    pub observation_id: Option<i64>,
    /// Location and index of the failing batch, when a batch failed
    pub location: Option<i32>,
    pub batch_index: Option<usize>,
    pub error: String,
}

/// Final state of a request after one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Every linked observation is deleted and the request is marked actioned
    Actioned,
    /// All in-scope files are gone but these observations still hold other
    /// eligible files, so the request stays pending
    Incomplete { retained: Vec<i64> },
    Failed(FailureReport),
    /// Cancelled (or otherwise no longer pending) when processing reached it
    Cancelled,
}

impl RequestOutcome {
    /// Label used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Actioned => "actioned",
            RequestOutcome::Incomplete { .. } => "incomplete",
            RequestOutcome::Failed(_) => "failed",
            RequestOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestReport {
    pub request_id: i64,
    pub file_type_filter: Option<i32>,
    pub observations_deleted: Vec<i64>,
    pub files_deleted: u64,
    pub bytes_deleted: u64,
    #[serde(flatten)]
    pub outcome: RequestOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when shutdown stopped the run before every request was processed
    pub interrupted: bool,
    pub requests: Vec<RequestReport>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            interrupted: false,
            requests: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn count(&self, outcome: &str) -> usize {
        self.requests
            .iter()
            .filter(|r| r.outcome.as_str() == outcome)
            .count()
    }

    pub fn files_deleted(&self) -> u64 {
        self.requests.iter().map(|r| r.files_deleted).sum()
    }

    pub fn bytes_deleted(&self) -> u64 {
        self.requests.iter().map(|r| r.bytes_deleted).sum()
    }

    /// True when any request failed or the run was cut short.
    pub fn has_failures(&self) -> bool {
        self.interrupted
            || self
                .requests
                .iter()
                .any(|r| matches!(r.outcome, RequestOutcome::Failed(_)))
    }

    /// Log the run totals and one line per request that was not actioned.
    pub fn log(&self) {
        let dry_run_msg = if self.dry_run { " (DRY RUN)" } else { "" };

        tracing::info!(
            run_id = %self.run_id,
            requests = self.requests.len(),
            actioned = self.count("actioned"),
            incomplete = self.count("incomplete"),
            failed = self.count("failed"),
            cancelled = self.count("cancelled"),
            files_deleted = self.files_deleted(),
            bytes_deleted = self.bytes_deleted(),
            interrupted = self.interrupted,
            "Deletion run complete{}",
            dry_run_msg
        );

        for report in &self.requests {
            match &report.outcome {
                RequestOutcome::Actioned => {}
                RequestOutcome::Incomplete { retained } => tracing::info!(
                    request_id = report.request_id,
                    retained = ?retained,
                    "Request not actioned: observations still hold files outside its scope"
                ),
                RequestOutcome::Failed(failure) => tracing::warn!(
                    request_id = report.request_id,
                    observation_id = ?failure.observation_id,
                    location = ?failure.location,
                    batch_index = ?failure.batch_index,
                    error = %failure.error,
                    "Request not actioned: processing failed"
                ),
                RequestOutcome::Cancelled => tracing::info!(
                    request_id = report.request_id,
                    "Request skipped: no longer pending"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(request_id: i64, outcome: RequestOutcome, files: u64) -> RequestReport {
        RequestReport {
            request_id,
            file_type_filter: None,
            observations_deleted: vec![],
            files_deleted: files,
            bytes_deleted: files * 10,
            outcome,
        }
    }

    #[test]
    fn test_totals_and_failures() {
        let mut summary = RunSummary::new(Uuid::new_v4(), false);
        summary.requests.push(report(1, RequestOutcome::Actioned, 18));
        summary.requests.push(report(
            4,
            RequestOutcome::Incomplete {
                retained: vec![9000000041],
            },
            2,
        ));
        assert_eq!(summary.files_deleted(), 20);
        assert_eq!(summary.bytes_deleted(), 200);
        assert_eq!(summary.count("actioned"), 1);
        assert!(!summary.has_failures());

        summary.requests.push(report(
            2,
            RequestOutcome::Failed(FailureReport {
                observation_id: Some(9000000021),
                location: Some(2),
                batch_index: Some(0),
                error: "boom".to_string(),
            }),
            0,
        ));
        assert!(summary.has_failures());
    }

    #[test]
    fn test_interrupted_counts_as_failure() {
        let mut summary = RunSummary::new(Uuid::new_v4(), true);
        summary.interrupted = true;
        assert!(summary.has_failures());
    }

    #[test]
    fn test_report_serializes_flat_outcome() {
        let value = serde_json::to_value(report(
            4,
            RequestOutcome::Incomplete {
                retained: vec![9000000041],
            },
            2,
        ))
        .unwrap();

        assert_eq!(value["request_id"], 4);
        assert_eq!(value["outcome"], "incomplete");
        assert_eq!(value["retained"][0], 9000000041_i64);

        let failed = serde_json::to_value(report(
            2,
            RequestOutcome::Failed(FailureReport {
                observation_id: Some(9000000021),
                location: Some(2),
                batch_index: None,
                error: "backend down".to_string(),
            }),
            0,
        ))
        .unwrap();
        assert_eq!(failed["outcome"], "failed");
        assert_eq!(failed["error"], "backend down");
    }
}
