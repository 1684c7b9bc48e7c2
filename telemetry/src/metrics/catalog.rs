//! Stable metric names and bucket schemes.

use super::registry::MetricRegistry;
use crate::error::MetricsError;

/// Latency buckets in seconds, used when a histogram is not registered.
pub const DEFAULT_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

pub const HTTP_CLIENT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

pub const PRODUCER_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// 1 KiB up to 1 GiB.
pub const MEMORY_BUCKETS: &[f64] = &[
    1_024.0,
    10_240.0,
    102_400.0,
    1_048_576.0,
    10_485_760.0,
    104_857_600.0,
    1_073_741_824.0,
];

pub const HTTP_REQUEST_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

pub const HTTP_APP_INFO: &str = "http_app_info";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_RESPONSES_TOTAL: &str = "http_responses_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const HTTP_EXCEPTIONS_TOTAL: &str = "http_exceptions_total";
pub const HTTP_REQUESTS_IN_PROGRESS: &str = "http_requests_in_progress";

/// Registers the families written by the request metrics middleware.
///
/// # Errors
///
/// Fails when one of the names is already registered as another kind.
pub fn register_request_metrics(registry: &MetricRegistry) -> Result<(), MetricsError> {
    registry.register_gauge(HTTP_APP_INFO, "Application information", &["service_name"])?;
    registry.register_counter(
        HTTP_REQUESTS_TOTAL,
        "Total count of requests by method and path",
        &["method", "path", "service_name"],
    )?;
    registry.register_counter(
        HTTP_RESPONSES_TOTAL,
        "Total count of responses by method, path and status code",
        &["method", "path", "status_code", "service_name"],
    )?;
    registry.register_histogram(
        HTTP_REQUEST_DURATION_SECONDS,
        "Histogram of request processing time by path, in seconds",
        &["method", "path", "service_name"],
        HTTP_REQUEST_BUCKETS,
    )?;
    registry.register_counter(
        HTTP_EXCEPTIONS_TOTAL,
        "Total count of exceptions raised by path and exception type",
        &["method", "path", "exception_type", "service_name"],
    )?;
    registry.register_gauge(
        HTTP_REQUESTS_IN_PROGRESS,
        "Gauge of requests by method and path currently being processed",
        &["method", "path", "service_name"],
    )?;
    Ok(())
}
