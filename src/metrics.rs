//! Prometheus metrics export for the assessment pipeline.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const ASSESSMENTS_TOTAL: &str = "payrisk_assessments_total";
pub const ASSESSMENTS_BLOCKED: &str = "payrisk_assessments_blocked_total";
pub const ML_FALLBACK_TOTAL: &str = "payrisk_ml_fallback_total";
pub const STORE_RETRY_QUEUE_DEPTH: &str = "payrisk_store_retry_queue_depth";
pub const ASSESSMENT_DURATION_MS: &str = "payrisk_assessment_duration_ms";

/// Installs the global Prometheus recorder and returns a handle whose
/// `render()` output backs the `/metrics` endpoint.
pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(ASSESSMENTS_TOTAL, "total assessments completed");
    metrics::describe_counter!(ASSESSMENTS_BLOCKED, "total assessments resulting in BLOCK");
    metrics::describe_counter!(ML_FALLBACK_TOTAL, "total assessments that used the ML fallback heuristic");
    metrics::describe_gauge!(STORE_RETRY_QUEUE_DEPTH, "pending rows in the durable retry queue");
    metrics::describe_histogram!(ASSESSMENT_DURATION_MS, "end-to-end assessment latency");
}

pub fn record_assessment(action: &crate::models::Action, duration_ms: f64, ml_degraded: bool) {
    metrics::counter!(ASSESSMENTS_TOTAL).increment(1);
    if matches!(action, crate::models::Action::Block) {
        metrics::counter!(ASSESSMENTS_BLOCKED).increment(1);
    }
    if ml_degraded {
        metrics::counter!(ML_FALLBACK_TOTAL).increment(1);
    }
    metrics::histogram!(ASSESSMENT_DURATION_MS).record(duration_ms);
}

pub fn record_retry_queue_depth(depth: u64) {
    metrics::gauge!(STORE_RETRY_QUEUE_DEPTH).set(depth as f64);
}
