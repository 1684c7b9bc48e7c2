use std::borrow::Cow;
use std::fmt::Write as _;

use colored::Colorize;
use serde_json::Value;

use crate::config::LogFormat;
use crate::record::LogRecord;

/// Renders a record as a single line, including the trailing newline.
///
/// # Errors
///
/// Returns the serializer error when the record cannot be encoded as JSON.
pub fn render(record: &LogRecord, format: LogFormat) -> Result<String, serde_json::Error> {
    match format {
        LogFormat::Json => render_json(record),
        LogFormat::Pretty => Ok(render_pretty(record)),
    }
}

pub fn render_json(record: &LogRecord) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

pub fn render_pretty(record: &LogRecord) -> String {
    let level = format!("{:<5}", record.level.to_uppercase());
    let level = match record.level {
        "trace" => level.cyan(),
        "debug" => level.blue(),
        "info" => level.green(),
        "warn" => level.yellow(),
        _ => level.red().bold(),
    };

    let mut line = format!(
        "{} [{}] {} {}",
        record.timestamp.bright_black(),
        level,
        single_line(record.log.logger.as_deref().unwrap_or(&record.service.name)).bright_cyan(),
        single_line(&record.message).white().bold(),
    );

    for (key, value) in &record.labels {
        let value = match value {
            Value::String(text) => single_line(text).into_owned(),
            other => other.to_string(),
        };
        let _ = write!(line, " {}={}", single_line(key).bright_yellow(), value.bright_white());
    }

    if let Some(error) = &record.error {
        let _ = write!(line, " {}", format!("{}: {}", single_line(&error.kind), single_line(&error.message)).red());
    }

    let _ = write!(
        line,
        " {}",
        format!(
            "trace={} span={}",
            record.trace_id.as_deref().unwrap_or("-"),
            record.span_id.as_deref().unwrap_or("-"),
        )
        .bright_black()
    );
    line.push('\n');
    line
}

/// Escapes line breaks so a record never spans more than one line.
fn single_line(text: &str) -> Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        Cow::Owned(text.replace('\r', "\\r").replace('\n', "\\n"))
    } else {
        Cow::Borrowed(text)
    }
}
