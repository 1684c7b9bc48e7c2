use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::config::{LogFormat, LoggerConfig, ServiceIdentity};
use crate::correlation::{AmbientCorrelation, CorrelationIds, CorrelationSource};
use crate::formatters;
use crate::record::{
    ErrorDetail, EventInfo, FileOrigin, LogEvent, LogLevel, LogMeta, LogOrigin, LogRecord, ProcessInfo, ThreadInfo,
};
use crate::redactor::MaskingEngine;

/// Writes masked, correlated log records, one line per call.
///
/// Emission never fails: masking, serialization and I/O problems degrade
/// to a simpler record instead of reaching the caller.
pub struct LogSink {
    service: ServiceIdentity,
    format: LogFormat,
    masking: Arc<MaskingEngine>,
    correlation: Arc<dyn CorrelationSource>,
    process_name: Option<String>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("service", &self.service)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl LogSink {
    pub fn new(config: &LoggerConfig, masking: Arc<MaskingEngine>, writer: impl Write + Send + 'static) -> Self {
        let masking = if config.redaction_enabled {
            masking
        } else {
            Arc::new(MaskingEngine::disabled())
        };
        Self {
            service: config.service.clone(),
            format: config.format,
            masking,
            correlation: Arc::new(AmbientCorrelation),
            process_name: current_process_name(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout(config: &LoggerConfig, masking: Arc<MaskingEngine>) -> Self {
        Self::new(config, masking, io::stdout())
    }

    #[must_use]
    pub fn with_correlation(mut self, source: Arc<dyn CorrelationSource>) -> Self {
        self.correlation = source;
        self
    }

    pub fn masking(&self) -> &Arc<MaskingEngine> {
        &self.masking
    }

    pub fn emit(&self, level: LogLevel, message: &str, labels: &Map<String, Value>, error: Option<&ErrorDetail>) {
        let mut event = LogEvent::new(level, message);
        event.labels = labels.clone();
        event.error = error.cloned();
        self.emit_event(event);
    }

    pub fn emit_event(&self, event: LogEvent) {
        let ids = panic::catch_unwind(AssertUnwindSafe(|| self.correlation.correlation_ids())).unwrap_or(None);
        let line = match panic::catch_unwind(AssertUnwindSafe(|| self.masked(&event))) {
            Ok(masked) => {
                let record = self.record(masked, ids);
                formatters::render(&record, self.format).unwrap_or_else(|_| minimal_line(&record.message, &event))
            }
            Err(_) => minimal_line(&event.message, &event),
        };
        self.write_line(line.as_bytes());
    }

    fn masked(&self, event: &LogEvent) -> LogEvent {
        LogEvent {
            message: self.masking.mask_text(&event.message),
            labels: self.masking.mask_map(&event.labels, true),
            error: event
                .error
                .as_ref()
                .map(|error| ErrorDetail::new(self.masking.mask_text(&error.message), error.kind.clone())),
            ..event.clone()
        }
    }

    fn record(&self, event: LogEvent, ids: Option<CorrelationIds>) -> LogRecord {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let thread = std::thread::current();
        let (trace_id, span_id) = ids.map_or((None, None), |ids| (Some(ids.trace_id), Some(ids.span_id)));
        LogRecord {
            timestamp: now.clone(),
            level: event.level.as_str(),
            message: event.message,
            trace_id,
            span_id,
            labels: event.labels,
            service: self.service.clone(),
            log: LogMeta {
                level: event.level.as_str(),
                logger: event.logger,
                module: event.module,
                origin: LogOrigin {
                    file: FileOrigin {
                        name: event.file,
                        line: event.line,
                    },
                },
            },
            process: ProcessInfo {
                pid: std::process::id(),
                name: self.process_name.clone(),
                thread: ThreadInfo {
                    id: format!("{:?}", thread.id()),
                    name: thread.name().map(str::to_string),
                },
            },
            event: EventInfo { created: now },
            error: event.error,
        }
    }

    fn write_line(&self, line: &[u8]) {
        let mut writer = self.writer.lock();
        let _ = writer.write_all(line);
        let _ = writer.flush();
    }
}

fn minimal_line(message: &str, event: &LogEvent) -> String {
    let mut line = json!({
        "@timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        "level": event.level.as_str(),
        "message": message,
    })
    .to_string();
    line.push('\n');
    line
}

fn current_process_name() -> Option<String> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_error_type_is_not_masked() {
        let buffer = SharedBuffer::default();
        let sink = LogSink::new(&LoggerConfig::default(), Arc::new(MaskingEngine::default()), buffer.clone());

        let error = ErrorDetail::new("lookup failed for maria@example.com", "maria@example.com");
        sink.emit(LogLevel::Error, "failed", &Map::new(), Some(&error));

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let record: Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(record["error"]["message"], "lookup failed for mar***@example.com");
        assert_eq!(record["error"]["type"], "maria@example.com");
    }

    #[test]
    fn test_write_failures_are_swallowed() {
        let sink = LogSink::new(&LoggerConfig::default(), Arc::new(MaskingEngine::default()), FailingWriter);
        sink.emit(LogLevel::Info, "nobody is listening", &Map::new(), None);
    }

    #[test]
    fn test_redaction_can_be_switched_off() {
        let buffer = SharedBuffer::default();
        let config = LoggerConfig {
            redaction_enabled: false,
            ..LoggerConfig::default()
        };
        let sink = LogSink::new(&config, Arc::new(MaskingEngine::default()), buffer.clone());
        sink.emit(LogLevel::Info, "joao@example.com", &Map::new(), None);

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert!(output.contains("joao@example.com"));
    }
}
