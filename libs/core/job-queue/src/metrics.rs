//! Prometheus metrics for the job engine
//!
//! Provides observability into queue throughput and worker health.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls return the same handle. If a
/// different recorder is already installed, metrics are not exported and
/// `None` is returned.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| -> Result<PrometheusHandle, BuildError> {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics initialized");
            Ok(handle)
        })
        .map_err(|e| {
            warn!(error = %e, "Failed to install Prometheus recorder");
        })
        .ok()
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> Option<String> {
    prometheus_handle().map(|h| h.render())
}

/// Record jobs accepted by the producer
pub fn record_enqueued(queue: &str, count: u64) {
    counter!(
        "job_queue_jobs_total",
        "queue" => queue.to_string(),
        "status" => "enqueued"
    )
    .increment(count);
}

/// Record finished records removed by a retention sweep
pub fn record_evicted(count: u64) {
    counter!("job_queue_evicted_total").increment(count);
}

/// Per-queue metrics helper used by the worker
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    queue: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self { queue: queue.into() }
    }

    /// Record a job being claimed
    pub fn job_claimed(&self) {
        counter!(
            "job_queue_jobs_total",
            "queue" => self.queue.clone(),
            "status" => "claimed"
        )
        .increment(1);
    }

    /// Record a successful attempt
    pub fn job_completed(&self, duration: Duration) {
        counter!(
            "job_queue_jobs_total",
            "queue" => self.queue.clone(),
            "status" => "completed"
        )
        .increment(1);
        self.record_duration(duration, "completed");
    }

    /// Record a failed attempt
    ///
    /// `kind` is the [`JobError`](crate::JobError) label.
    pub fn job_failed(&self, kind: &'static str, will_retry: bool, duration: Duration) {
        let status = if will_retry { "retrying" } else { "failed" };
        counter!(
            "job_queue_jobs_total",
            "queue" => self.queue.clone(),
            "status" => status,
            "error" => kind
        )
        .increment(1);
        self.record_duration(duration, "failed");

        if will_retry {
            counter!("job_queue_retries_total", "queue" => self.queue.clone()).increment(1);
        }
    }

    /// Record stalled jobs returned to the ready set
    pub fn stalled_requeued(&self, count: u64) {
        counter!("job_queue_stalled_total", "queue" => self.queue.clone()).increment(count);
    }

    fn record_duration(&self, duration: Duration, outcome: &'static str) {
        histogram!(
            "job_queue_job_duration_seconds",
            "queue" => self.queue.clone(),
            "outcome" => outcome
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = QueueMetrics::new("email-queue");
        assert_eq!(metrics.queue, "email-queue");

        // Without a recorder these are no-ops.
        metrics.job_completed(Duration::from_millis(5));
        metrics.job_failed("timeout", true, Duration::from_millis(5));
    }
}
