use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// State for the scrape endpoint, kept apart from [`AppState`](crate::app_state::AppState).
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<JobQueue>,
}

/// GET /metrics: Prometheus text exposition.
///
/// Queue depth is sampled on scrape since nothing else reads it.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("tryon_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to sample queue depth"),
    }
    state.handle.render()
}
