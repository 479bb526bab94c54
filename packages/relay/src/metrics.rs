use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::WebhookMetrics;

/// Failure ratio at or above which the pipeline reports unhealthy
const UNHEALTHY_FAILURE_RATIO: f64 = 0.1;
/// Idle time after which the pipeline reports unhealthy, in seconds
const MAX_IDLE_SECS: i64 = 3600;

/// Process-wide counters for processed webhook events.
///
/// All updates go through the mutex, so concurrent `record` calls
/// cannot lose increments.
pub struct MetricsTracker {
    inner: Mutex<WebhookMetrics>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(WebhookMetrics::default()),
        }
    }

    /// Fold one processed event into the counters.
    pub async fn record(&self, event_type: &str, success: bool, processing_time_ms: f64) {
        let mut metrics = self.inner.lock().await;

        metrics.total_events += 1;
        if success {
            metrics.successful_events += 1;
        } else {
            metrics.failed_events += 1;
            metrics.errors_count += 1;
        }

        // Incremental mean, stable without a separate running sum
        metrics.average_processing_time +=
            (processing_time_ms - metrics.average_processing_time) / metrics.total_events as f64;

        *metrics
            .events_by_type
            .entry(event_type.to_string())
            .or_insert(0) += 1;
        metrics.last_processed_at = Some(Utc::now());
    }

    /// Copy of the current counters, never a live reference.
    pub async fn snapshot(&self) -> WebhookMetrics {
        self.inner.lock().await.clone()
    }

    /// Zero all counters. Intended for test isolation.
    pub async fn reset(&self) {
        *self.inner.lock().await = WebhookMetrics::default();
    }

    /// Healthy when idle since start, or failing rarely and processed
    /// something within the last hour.
    pub async fn is_healthy(&self) -> bool {
        let metrics = self.inner.lock().await;

        if metrics.total_events == 0 {
            return true;
        }

        let failure_ratio = metrics.failed_events as f64 / metrics.total_events as f64;
        let recently_active = metrics
            .last_processed_at
            .map(|at| Utc::now().signed_duration_since(at).num_seconds() < MAX_IDLE_SECS)
            .unwrap_or(false);

        failure_ratio < UNHEALTHY_FAILURE_RATIO && recently_active
    }
}
