use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ServiceIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
        }
    }
}

/// A log call as handed to the sink, before masking.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub labels: Map<String, Value>,
    pub error: Option<ErrorDetail>,
    pub logger: Option<String>,
    pub module: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            labels: Map::new(),
            error: None,
            logger: None,
            module: None,
            file: None,
            line: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorDetail) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOrigin {
    pub name: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogOrigin {
    pub file: FileOrigin,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogMeta {
    pub level: &'static str,
    pub logger: Option<String>,
    pub module: Option<String>,
    pub origin: LogOrigin,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: Option<String>,
    pub thread: ThreadInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventInfo {
    pub created: String,
}

/// The ECS document written for one log call.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub level: &'static str,
    pub message: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub labels: Map<String, Value>,
    pub service: ServiceIdentity,
    pub log: LogMeta,
    pub process: ProcessInfo,
    pub event: EventInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}
