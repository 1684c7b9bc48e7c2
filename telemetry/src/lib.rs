//! Operation instrumentation for services: correlated spans, OpenMetrics
//! metrics and masked structured logs from one wrapper.
//!
//! This crate provides:
//! - Instrumented business operations, outgoing HTTP calls, message
//!   production and consumption, and server-side operations
//! - A metric registry with OpenMetrics exposition and trace exemplars
//! - Sampled memory growth per operation
//! - Request metrics middleware for axum/tower with route templates
//! - W3C `traceparent` propagation
//! - OTLP span export over gRPC or HTTP
//!
//! Logs emitted inside an instrumented operation carry its trace and span
//! ids and are masked by [`logger_redacted`] before they are written.
//!
//! # Example
//!
//! ```rust,no_run
//! use telemetry::{RouteTemplates, TelemetryEngine};
//!
//! #[derive(Debug)]
//! struct PaymentDeclined;
//!
//! impl std::fmt::Display for PaymentDeclined {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("payment declined")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let telemetry = TelemetryEngine::from_env()?;
//!     telemetry.init_logging()?;
//!
//!     let charge = telemetry
//!         .instrumentation()
//!         .business("charge_card")
//!         .wrap(|amount: u64| async move {
//!             tracing::info!(amount, "charging card 4111 1111 1111 1234");
//!             if amount > 10_000 { Err(PaymentDeclined) } else { Ok(amount) }
//!         });
//!     let _ = charge.call(4_200).await;
//!
//!     let app = axum::Router::new()
//!         .route("/orders/:id", axum::routing::get(|| async { "ok" }))
//!         .layer(telemetry.request_metrics_layer(RouteTemplates::new()))
//!         .merge(telemetry.metrics_router());
//!     # let _ = app;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod exporter;
pub mod instrumentation;
pub mod memory;
pub mod metrics;
pub mod middleware;
pub mod propagation;
pub mod trace;

pub use config::{OtlpEndpoint, OtlpProtocol, OtlpSettings, TelemetrySettings};
pub use engine::{TelemetryEngine, TelemetryEngineBuilder};
pub use error::*;
pub use exporter::{install_tracer_provider, trace_resource};
pub use instrumentation::{
    Blocking, CallLabels, Instrumentation, Instrumented, OperationBuilder, OperationCategory, OperationDescriptor,
    Suspending,
};
pub use memory::{MemoryProbe, MemorySample, MemorySampler, ProcessMemoryProbe};
pub use metrics::{Counter, Exemplar, Gauge, Histogram, MetricRegistry, OPENMETRICS_CONTENT_TYPE};
pub use middleware::{metrics_handler, metrics_router, RequestMetrics, RequestMetricsLayer, RouteTemplates};
pub use trace::{CorrelationIds, OtelTraceBridge, TraceBridge};
