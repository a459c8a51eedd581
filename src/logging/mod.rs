//! Logging infrastructure around the aggregation pipeline
//!
//! Installs the crate's own diagnostics (console and JSON file output through
//! `tracing-subscriber`) and connects application logging to a
//! [`RealtimeAggregatingHandler`]: [`AggregatingLayer`] for `tracing` events and
//! [`LogBridge`] for the `log` facade.

pub mod config;
pub mod formatters;
pub mod metrics;
pub mod rotation;
pub mod spans;

use crate::aggregator::RealtimeAggregatingHandler;
use crate::error::{AggregatorError, Result};
use crate::record::{LogLevel, LogRecord};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::Context;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use config::LoggingConfig;
pub use formatters::{ConsoleFormatter, RecordFormatter};
pub use metrics::{MetricsCollector, PerformanceStats};
pub use rotation::{LogRotationManager, RotationConfig};

const CRATE_TARGET: &str = "aggregated_logging";

/// Events on the crate's own targets never re-enter the pipeline
fn is_internal_target(target: &str) -> bool {
    target == CRATE_TARGET || target.starts_with("aggregated_logging::")
}

/// Initialize diagnostics; keep the returned guard alive to flush file output
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    init_logging_with(config, None)
}

/// Initialize diagnostics and feed every application event into `handler`
pub fn init_logging_with(
    config: &LoggingConfig,
    handler: Option<Arc<RealtimeAggregatingHandler>>,
) -> Result<Option<WorkerGuard>> {
    config.validate()?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.filter_directives())
            .map_err(|e| AggregatorError::InvalidConfig(format!("invalid filter directives: {e}")))?,
    };

    let mut layers = Vec::new();

    // Console output layer
    if config.console_output {
        if config.include_file_location {
            let console_layer = tracing_fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true);
            layers.push(console_layer.boxed());
        } else {
            let console_layer = tracing_fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(ConsoleFormatter::new());
            layers.push(console_layer.boxed());
        }
    }

    // File output layer
    let mut guard = None;
    if let Some(ref log_dir) = config.log_directory {
        let file_appender = tracing_appender::rolling::daily(log_dir, "aggregated_logging.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let file_layer = tracing_fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json();
        layers.push(file_layer.boxed());
    }

    if let Some(handler) = handler {
        layers.push(AggregatingLayer::new(handler).boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| AggregatorError::InvalidConfig(format!("logging already initialized: {e}")))?;

    tracing::info!(target: "aggregated_logging::internal", ?config, "Logging system initialized");
    Ok(guard)
}

/// Collects an event's message and fields
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl RecordVisitor {
    fn into_message(self) -> String {
        let mut message = self.message.unwrap_or_default();
        for field in self.fields {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&field);
        }
        message
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// `tracing` layer converting events into records for the aggregating handler
pub struct AggregatingLayer {
    handler: Arc<RealtimeAggregatingHandler>,
}

impl AggregatingLayer {
    pub fn new(handler: Arc<RealtimeAggregatingHandler>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<RealtimeAggregatingHandler> {
        &self.handler
    }
}

/// Record equivalent of a `tracing` event
pub fn record_from_event(event: &Event<'_>) -> LogRecord {
    let metadata = event.metadata();
    let mut visitor = RecordVisitor::default();
    event.record(&mut visitor);

    let record = LogRecord::new(LogLevel::from(*metadata.level()), metadata.target(), visitor.into_message());
    match (metadata.file(), metadata.line()) {
        (Some(file), Some(line)) => record.with_location(file, line),
        _ => record,
    }
}

impl<S: Subscriber> Layer<S> for AggregatingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if is_internal_target(event.metadata().target()) {
            return;
        }
        self.handler.emit(&record_from_event(event));
    }
}

/// `log` facade adapter feeding the aggregating handler
pub struct LogBridge {
    handler: Arc<RealtimeAggregatingHandler>,
    level: log::LevelFilter,
}

impl LogBridge {
    pub fn new(handler: Arc<RealtimeAggregatingHandler>, level: log::LevelFilter) -> Self {
        Self { handler, level }
    }

    /// Install as the global `log` logger
    pub fn install(self) -> std::result::Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= self.level && !is_internal_target(metadata.target())
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut converted = LogRecord::new(LogLevel::from(record.level()), record.target(), record.args().to_string());
        if let (Some(file), Some(line)) = (record.file(), record.line()) {
            converted = converted.with_location(file, line);
        }
        self.handler.emit(&converted);
    }

    fn flush(&self) {
        if let Err(e) = self.handler.flush() {
            tracing::warn!(target: "aggregated_logging::internal", error = %e, "log bridge flush failed");
        }
    }
}
