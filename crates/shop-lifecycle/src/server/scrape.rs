use crate::registry::METRICS_PATH;
use axum::{Router, extract::State, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;

/// Router serving the Prometheus text exposition format on
/// [`METRICS_PATH`].
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route(METRICS_PATH, get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
