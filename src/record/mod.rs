//! Log record model shared by every pipeline stage
//!
//! A [`LogRecord`] mirrors a conventional logging record: severity, logger name,
//! a `%`-style message template with positional arguments, source location,
//! optional exception details and a wall-clock timestamp. Records carry a
//! process-unique `id` so side caches can refer back to them.

pub mod message;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use message::{panic_detail, safe_get_message, safe_get_message_for_comparison};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Severity levels with the conventional numeric values
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// Parse a level name, accepting the usual short spellings
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" | "FATAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace | log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Error => LogLevel::Error,
        }
    }
}

/// Positional argument for a `%`-style message template
#[derive(Clone)]
pub enum FormatArg {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FormatArg>),
    Map(Vec<(String, FormatArg)>),
    /// Arbitrary value rendered through its `Display` implementation
    Display(Arc<dyn fmt::Display + Send + Sync>),
}

impl FormatArg {
    pub fn display<T: fmt::Display + Send + Sync + 'static>(value: T) -> Self {
        FormatArg::Display(Arc::new(value))
    }

    /// Rendering used by `%s`
    pub fn to_str(&self) -> String {
        match self {
            FormatArg::None => "None".to_string(),
            FormatArg::Bool(true) => "True".to_string(),
            FormatArg::Bool(false) => "False".to_string(),
            FormatArg::Int(value) => value.to_string(),
            FormatArg::Float(value) => format_float(*value),
            FormatArg::Str(value) => value.clone(),
            FormatArg::List(_) | FormatArg::Map(_) => self.repr(),
            FormatArg::Display(value) => value.to_string(),
        }
    }

    /// Rendering used by `%r` and inside containers
    pub fn repr(&self) -> String {
        match self {
            FormatArg::Str(value) => format!("'{}'", value.replace('\'', "\\'")),
            FormatArg::List(items) => {
                let parts: Vec<String> = items.iter().map(FormatArg::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            FormatArg::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(key, value)| format!("'{}': {}", key, value.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            other => other.to_str(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FormatArg::None => "NoneType",
            FormatArg::Bool(_) => "bool",
            FormatArg::Int(_) => "int",
            FormatArg::Float(_) => "float",
            FormatArg::Str(_) => "str",
            FormatArg::List(_) => "list",
            FormatArg::Map(_) => "dict",
            FormatArg::Display(_) => "object",
        }
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{sign}inf")
    } else {
        format!("{:?}", value)
    }
}

impl fmt::Debug for FormatArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatArg::Display(_) => f.write_str("FormatArg::Display(..)"),
            other => write!(f, "FormatArg({})", other.repr()),
        }
    }
}

impl From<&str> for FormatArg {
    fn from(value: &str) -> Self {
        FormatArg::Str(value.to_string())
    }
}

impl From<String> for FormatArg {
    fn from(value: String) -> Self {
        FormatArg::Str(value)
    }
}

impl From<i64> for FormatArg {
    fn from(value: i64) -> Self {
        FormatArg::Int(value)
    }
}

impl From<i32> for FormatArg {
    fn from(value: i32) -> Self {
        FormatArg::Int(value as i64)
    }
}

impl From<usize> for FormatArg {
    fn from(value: usize) -> Self {
        FormatArg::Int(value as i64)
    }
}

impl From<f64> for FormatArg {
    fn from(value: f64) -> Self {
        FormatArg::Float(value)
    }
}

impl From<bool> for FormatArg {
    fn from(value: bool) -> Self {
        FormatArg::Bool(value)
    }
}

impl<T: Into<FormatArg>> From<Option<T>> for FormatArg {
    fn from(value: Option<T>) -> Self {
        value.map_or(FormatArg::None, Into::into)
    }
}

/// Exception details attached to a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    pub traceback: Vec<String>,
}

impl ExceptionInfo {
    pub fn new(type_name: &str, message: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            message: message.to_string(),
            traceback: Vec::new(),
        }
    }

    pub fn with_traceback(mut self, lines: Vec<String>) -> Self {
        self.traceback = lines;
        self
    }
}

/// One incoming log record
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Process-unique identity; preserved by [`LogRecord::with_message`]
    pub id: u64,
    pub level: LogLevel,
    pub logger_name: String,
    pub msg: String,
    pub args: Vec<FormatArg>,
    pub pathname: Option<String>,
    pub lineno: Option<u32>,
    pub module: String,
    pub exc_info: Option<ExceptionInfo>,
    pub created: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(level: LogLevel, logger_name: &str, msg: impl Into<String>) -> Self {
        Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            level,
            logger_name: logger_name.to_string(),
            msg: msg.into(),
            args: Vec::new(),
            pathname: None,
            lineno: None,
            module: module_from_logger(logger_name),
            exc_info: None,
            created: Utc::now(),
        }
    }

    pub fn with_args(mut self, args: Vec<FormatArg>) -> Self {
        self.args = args;
        self
    }

    /// Attach a source location; the module becomes the file stem
    pub fn with_location(mut self, pathname: &str, lineno: u32) -> Self {
        self.module = module_from_path(pathname).unwrap_or_else(|| self.module.clone());
        self.pathname = Some(pathname.to_string());
        self.lineno = Some(lineno);
        self
    }

    pub fn with_exception(mut self, exc_info: ExceptionInfo) -> Self {
        self.exc_info = Some(exc_info);
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// Copy of this record carrying an already rendered message
    ///
    /// Identity and timestamp are kept so caches keyed on the record still match.
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self {
            msg: message.into(),
            args: Vec::new(),
            ..self.clone()
        }
    }

    /// Rendered message, never failing
    pub fn message(&self) -> String {
        safe_get_message(self)
    }
}

fn module_from_path(pathname: &str) -> Option<String> {
    std::path::Path::new(pathname)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}

fn module_from_logger(logger_name: &str) -> String {
    logger_name
        .rsplit(['.', ':'])
        .find(|part| !part.is_empty())
        .unwrap_or(logger_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering_and_values() {
        assert!(LogLevel::Warning < LogLevel::Error);
        assert_eq!(LogLevel::Warning.as_u8(), 30);
        assert_eq!(LogLevel::Critical.as_u8(), 50);
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[test]
    fn test_record_identity_is_unique_and_preserved() {
        let first = LogRecord::new(LogLevel::Info, "app", "one");
        let second = LogRecord::new(LogLevel::Info, "app", "two");
        assert_ne!(first.id, second.id);

        let rewritten = first.with_message("changed");
        assert_eq!(rewritten.id, first.id);
        assert_eq!(rewritten.created, first.created);
        assert_eq!(rewritten.msg, "changed");
    }

    #[test]
    fn test_module_derivation() {
        let record = LogRecord::new(LogLevel::Info, "app.core.calc_engine", "x");
        assert_eq!(record.module, "calc_engine");

        let located = record.with_location("src/app/file_loader.py", 12);
        assert_eq!(located.module, "file_loader");
        assert_eq!(located.lineno, Some(12));
    }

    #[test]
    fn test_arg_rendering() {
        assert_eq!(FormatArg::None.to_str(), "None");
        assert_eq!(FormatArg::Float(1.0).to_str(), "1.0");
        assert_eq!(FormatArg::from("a").repr(), "'a'");
        let list = FormatArg::List(vec![FormatArg::Int(1), FormatArg::from("b")]);
        assert_eq!(list.to_str(), "[1, 'b']");
    }
}
