use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Tracing error: {0}")]
    Tracing(String),

    #[error("Trace export error: {0}")]
    Export(#[from] opentelemetry::trace::TraceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] logger_redacted::LoggerError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metric `{name}` is already registered as a {existing}")]
    KindMismatch { name: String, existing: &'static str },

    #[error("invalid metric name `{0}`")]
    InvalidName(String),

    #[error("invalid label `{label}` on metric `{name}`")]
    InvalidLabel { name: String, label: String },

    #[error("labels {given:?} do not match {expected:?} registered for `{name}`")]
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        given: Vec<String>,
    },

    #[error("histogram `{0}` needs strictly increasing, finite buckets")]
    InvalidBuckets(String),

    #[error("metric `{0}` is already registered with another definition")]
    DefinitionMismatch(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported OTLP protocol `{0}`, expected `grpc` or `http`")]
    InvalidProtocol(String),

    #[error("invalid port in OTLP endpoint `{0}`")]
    InvalidPort(String),

    #[error("memory sampling ratio must be within [0, 1], got {0}")]
    InvalidSamplingRatio(f64),

    #[error("service name must not be empty")]
    MissingServiceName,

    #[error("OTLP auth token is not a valid header value")]
    InvalidAuthToken,

    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
