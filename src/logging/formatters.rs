//! Formatters for console diagnostics and forwarded records
//!
//! `ConsoleFormatter` renders the crate's own tracing events. `RecordFormatter`
//! renders [`LogRecord`]s for the text and file sinks, either as readable lines
//! or as JSON lines.

use crate::operations::current_operation_id;
use crate::record::{safe_get_message, LogLevel, LogRecord};
use serde::Serialize;
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Console formatter for the crate's own diagnostics
pub struct ConsoleFormatter {
    with_colors: bool,
    with_timestamps: bool,
    compact_mode: bool,
}

impl ConsoleFormatter {
    pub fn new() -> Self {
        Self {
            with_colors: true,
            with_timestamps: true,
            compact_mode: false,
        }
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.with_colors = enabled;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    pub fn compact(mut self) -> Self {
        self.compact_mode = true;
        self
    }
}

impl Default for ConsoleFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        if self.with_timestamps {
            let now = chrono::Local::now();
            write!(writer, "{} ", now.format("%H:%M:%S%.3f"))?;
        }

        let level = LogLevel::from(*metadata.level());
        write!(writer, "[{}] ", level_label(level, self.with_colors))?;

        let target = metadata.target();
        if !self.compact_mode && !target.is_empty() {
            let short_target = target.rsplit("::").next().unwrap_or(target);
            write!(writer, "{}: ", short_target)?;
        }

        if let Some(span) = ctx.lookup_current() {
            let names: Vec<&str> = span.scope().from_root().map(|span| span.name()).collect();
            if let Some(innermost) = names.last() {
                if self.compact_mode {
                    write!(writer, "[{}] ", innermost)?;
                } else {
                    write!(writer, "[{}] ", names.join("::"))?;
                }
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn level_label(level: LogLevel, with_colors: bool) -> String {
    let name = format!("{:<8}", level.as_str());
    if !with_colors {
        return name;
    }
    let color = match level {
        LogLevel::Critical => "\x1b[1;31m",
        LogLevel::Error => "\x1b[31m",
        LogLevel::Warning => "\x1b[33m",
        LogLevel::Info => "\x1b[32m",
        LogLevel::Debug => "\x1b[36m",
    };
    format!("{color}{name}\x1b[0m")
}

/// JSON line written for a record
#[derive(Serialize)]
pub struct StructuredRecord {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: LogLevel,
    logger: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<String>,
}

impl StructuredRecord {
    pub fn from_record(record: &LogRecord) -> Self {
        Self {
            timestamp: record.created,
            level: record.level,
            logger: record.logger_name.clone(),
            message: safe_get_message(record),
            location: match (&record.pathname, record.lineno) {
                (Some(path), Some(line)) => Some(format!("{path}:{line}")),
                _ => None,
            },
            operation_id: current_operation_id().map(|id| id.to_string()),
            exception: record
                .exc_info
                .as_ref()
                .map(|exc| format!("{}: {}", exc.type_name, exc.message)),
        }
    }
}

/// Renders forwarded records for text and file sinks
#[derive(Debug, Clone)]
pub struct RecordFormatter {
    with_colors: bool,
    with_timestamps: bool,
    compact_mode: bool,
    json: bool,
}

impl RecordFormatter {
    pub fn new() -> Self {
        Self {
            with_colors: false,
            with_timestamps: true,
            compact_mode: false,
            json: false,
        }
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.with_colors = enabled;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    /// Omit the logger name
    pub fn compact(mut self) -> Self {
        self.compact_mode = true;
        self
    }

    /// One JSON object per line
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn format(&self, record: &LogRecord) -> String {
        if self.json {
            return serde_json::to_string(&StructuredRecord::from_record(record))
                .unwrap_or_else(|e| format!("{{\"serialization_error\":\"{e}\"}}"));
        }

        let mut line = String::new();
        if self.with_timestamps {
            line.push_str(&record.created.format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
        }
        line.push_str(&format!("[{}] ", level_label(record.level, self.with_colors)));
        if !self.compact_mode {
            line.push_str(&record.logger_name);
            line.push_str(": ");
        }
        line.push_str(&safe_get_message(record));
        if let Some(exc) = &record.exc_info {
            for frame in &exc.traceback {
                line.push_str("\n    ");
                line.push_str(frame);
            }
            line.push_str(&format!("\n{}: {}", exc.type_name, exc.message));
        }
        line
    }
}

impl Default for RecordFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Utility functions for log formatting
pub mod utils {
    /// Format duration for human readability
    pub fn format_duration(duration_ms: f64) -> String {
        if duration_ms < 1.0 {
            format!("{:.2}μs", duration_ms * 1000.0)
        } else if duration_ms < 1000.0 {
            format!("{:.2}ms", duration_ms)
        } else {
            format!("{:.2}s", duration_ms / 1000.0)
        }
    }

    /// Compact one-line status for a finished operation
    pub fn create_compact_message(operation: &str, duration_ms: f64, success: bool) -> String {
        let status = if success { "✓" } else { "✗" };
        format!("{} {} ({})", status, operation, format_duration(duration_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExceptionInfo;

    #[test]
    fn test_duration_units() {
        assert_eq!(utils::format_duration(0.25), "250.00μs");
        assert_eq!(utils::format_duration(42.0), "42.00ms");
        assert_eq!(utils::format_duration(2500.0), "2.50s");
    }

    #[test]
    fn test_compact_message_marks_failure() {
        let msg = utils::create_compact_message("export_results", 1200.0, false);
        assert_eq!(msg, "✗ export_results (1.20s)");
    }

    #[test]
    fn test_record_line() {
        let record = LogRecord::new(LogLevel::Warning, "app.io", "Disk at %d%%")
            .with_args(vec![95.into()])
            .with_exception(ExceptionInfo::new("IOError", "disk full"));
        let line = RecordFormatter::new().with_timestamps(false).format(&record);
        assert_eq!(line, "[WARNING ] app.io: Disk at 95%\nIOError: disk full");

        let compact = RecordFormatter::new().with_timestamps(false).compact().format(&record);
        assert!(compact.starts_with("[WARNING ] Disk at 95%"));
    }

    #[test]
    fn test_record_json() {
        let record = LogRecord::new(LogLevel::Info, "app", "hello").with_location("src/app.rs", 7);
        let line = RecordFormatter::new().json().format(&record);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["message"], "hello");
        assert_eq!(value["location"], "src/app.rs:7");
        assert!(value.get("operation_id").is_none());
    }
}
