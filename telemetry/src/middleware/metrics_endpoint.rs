use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::metrics::{MetricRegistry, OPENMETRICS_CONTENT_TYPE};

/// `GET /metrics` in the OpenMetrics text format.
pub async fn metrics_handler(State(registry): State<Arc<MetricRegistry>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], registry.export())
}

/// Router serving the registry at `/metrics`, ready to merge into an app.
pub fn metrics_router(registry: Arc<MetricRegistry>) -> Router {
    Router::new().route("/metrics", get(metrics_handler)).with_state(registry)
}
