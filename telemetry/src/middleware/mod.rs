//! Inbound HTTP instrumentation and the metrics pull endpoint.

pub mod metrics_endpoint;
pub mod request_metrics;
pub mod routes;

pub use metrics_endpoint::{metrics_handler, metrics_router};
pub use request_metrics::{RequestMetrics, RequestMetricsLayer};
pub use routes::RouteTemplates;
