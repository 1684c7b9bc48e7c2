//! Metric registry with OpenMetrics exposition.

pub mod catalog;
pub mod exposition;
pub mod instruments;
pub mod registry;

pub use exposition::OPENMETRICS_CONTENT_TYPE;
pub use instruments::{Counter, Exemplar, Gauge, Histogram, HistogramSnapshot, EXEMPLAR_TRACE_LABEL};
pub use registry::{LabelSet, MetricKind, MetricRegistry};
