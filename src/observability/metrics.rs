//! Prometheus metrics for deletion runs.
//!
//! Provides metrics for:
//! - Files and bytes removed per storage location
//! - Batch outcomes per storage location
//! - Request outcomes and run duration
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use crate::config::MetricsConfig;

/// Initialize the metrics system and start the scrape listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &config.duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()?;

    tracing::info!(listen = %config.listen, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a committed batch.
pub fn record_files_deleted(location: &str, files: u64, bytes: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("archive_purge_files_deleted_total", "location" => location.to_string())
            .increment(files);
        counter!("archive_purge_bytes_deleted_total", "location" => location.to_string())
            .increment(bytes);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (location, files, bytes);
    }
}

/// Record a batch outcome ("committed", "dry_run", "failed").
pub fn record_batch(location: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("archive_purge_batches_total", "location" => location.to_string(), "outcome" => outcome.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (location, outcome);
    }
}

/// Record the outcome of a deletion request.
pub fn record_request(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("archive_purge_requests_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record the wall-clock duration of a run.
pub fn record_run_duration(duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("archive_purge_run_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = duration_secs;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics exporter: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
