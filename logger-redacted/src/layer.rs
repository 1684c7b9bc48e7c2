use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{LoggerError, Result};
use crate::record::{ErrorDetail, LogEvent, LogLevel};
use crate::sink::LogSink;

/// Forwards `tracing` events to a [`LogSink`].
///
/// The `message` field becomes the record message, `error.message` and
/// `error.type` become the error detail, and every other field a label.
#[derive(Debug, Clone)]
pub struct EcsLayer {
    sink: Arc<LogSink>,
}

impl EcsLayer {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for EcsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let error = fields.error_detail();
        self.sink.emit_event(LogEvent {
            level: LogLevel::from(*metadata.level()),
            message: fields.message,
            labels: fields.labels,
            error,
            logger: Some(metadata.target().to_string()),
            module: metadata.module_path().map(str::to_string),
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
        });
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    labels: Map<String, Value>,
    error_message: Option<String>,
    error_type: Option<String>,
}

impl FieldCollector {
    fn error_detail(&mut self) -> Option<ErrorDetail> {
        match (self.error_message.take(), self.error_type.take()) {
            (None, None) => None,
            (message, kind) => Some(ErrorDetail::new(
                message.unwrap_or_default(),
                kind.unwrap_or_else(|| "Error".to_string()),
            )),
        }
    }

    fn record_value(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                }
            }
            "error.message" => self.error_message = Some(value_text(value)),
            "error.type" => self.error_type = Some(value_text(value)),
            name => {
                self.labels.insert(name.to_string(), value);
            }
        }
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

impl Visit for FieldCollector {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if field.name() == "error" {
            self.error_message = Some(value.to_string());
        } else {
            self.record_value(field, Value::from(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, Value::from(format!("{value:?}")));
    }
}

/// # Errors
///
/// Fails when `directive` is not a valid `EnvFilter` directive.
pub fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive).map_err(|err| LoggerError::InvalidFilter {
        directive: directive.to_string(),
        reason: err.to_string(),
    })
}

/// Installs `registry + EnvFilter + EcsLayer` as the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_directive`.
///
/// # Errors
///
/// Fails when the directive cannot be parsed or a global subscriber is
/// already installed.
pub fn init_logging(sink: Arc<LogSink>, default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(default_directive)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(EcsLayer::new(sink))
        .try_init()
        .map_err(|err| LoggerError::SubscriberInit(err.to_string()))
}
