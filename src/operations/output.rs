//! Destinations for completed operation traces

use super::log::{OperationLog, OperationStatus};
use crate::aggregator::tables::format_ascii_table;
use crate::logging::formatters::utils::{create_compact_message, format_duration};
use crate::logging::metrics::{MetricsCollector, PerformanceStats};
use crate::record::{LogLevel, LogRecord};
use crate::sink::LogSink;
use std::sync::{Arc, Mutex, PoisonError};

const OPERATIONS_LOGGER: &str = "operations";
const DEFAULT_TABLE_WIDTH: usize = 120;

/// Receives every finished [`OperationLog`]
pub trait OperationSink: Send + Sync {
    fn record_operation(&self, log: &OperationLog);
}

impl<T: OperationSink + ?Sized> OperationSink for Arc<T> {
    fn record_operation(&self, log: &OperationLog) {
        (**self).record_operation(log)
    }
}

/// Keeps finished operations in memory
#[derive(Debug, Default)]
pub struct MemoryOperationSink {
    logs: Mutex<Vec<OperationLog>>,
}

impl MemoryOperationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<OperationLog> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OperationSink for MemoryOperationSink {
    fn record_operation(&self, log: &OperationLog) {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(log.clone());
    }
}

/// Renders each operation as one record (header plus step table) into a [`LogSink`]
///
/// Also tracks per-operation duration statistics.
pub struct AggregatedOperationSink {
    target: Arc<dyn LogSink>,
    metrics: MetricsCollector,
    max_table_width: usize,
}

impl AggregatedOperationSink {
    pub fn new(target: Arc<dyn LogSink>) -> Self {
        Self {
            target,
            metrics: MetricsCollector::new(true),
            max_table_width: DEFAULT_TABLE_WIDTH,
        }
    }

    pub fn with_table_width(mut self, max_table_width: usize) -> Self {
        self.max_table_width = max_table_width;
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn operation_statistics(&self, operation: &str) -> Option<PerformanceStats> {
        self.metrics.calculate_stats(operation)
    }

    pub fn render(&self, log: &OperationLog) -> String {
        let success = log.status != OperationStatus::Error;
        let mut header = create_compact_message(&log.operation_name, log.duration_ms(), success);
        header.push_str(&format!(" | {} sub-operations", log.sub_operations.len()));
        let failed = log.failed_sub_operations();
        if failed > 0 {
            header.push_str(&format!(" ({failed} failed)"));
        }
        header.push_str(&format!(" | {}:{}", log.source_file, log.source_line));

        let mut lines = vec![header];
        if !log.sub_operations.is_empty() {
            lines.push(self.step_table(log));
        }
        if let Some(exception) = &log.exception_info {
            lines.push(format!("Error: {exception}"));
        }
        lines.join("\n")
    }

    fn step_table(&self, log: &OperationLog) -> String {
        let headers: Vec<String> = ["Step", "Operation", "Target", "Status", "Duration", "Result"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows: Vec<Vec<String>> = log
            .sub_operations
            .iter()
            .map(|sub| {
                vec![
                    sub.step_number.to_string(),
                    sub.operation_name.clone(),
                    sub.target.clone(),
                    sub.status.as_str().to_string(),
                    format_duration(sub.duration_ms()),
                    sub.error_details
                        .clone()
                        .or_else(|| sub.response_data_type.clone())
                        .unwrap_or_default(),
                ]
            })
            .collect();

        format_ascii_table(&headers, &rows, self.max_table_width).unwrap_or_else(|_| {
            rows.iter()
                .map(|row| format!("  {}", row.join(" | ")))
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

impl OperationSink for AggregatedOperationSink {
    fn record_operation(&self, log: &OperationLog) {
        let success = log.status != OperationStatus::Error;
        self.metrics
            .record_ms(&log.operation_name, log.duration_ms(), Some(log.operation_id), success);

        let level = if success { LogLevel::Info } else { LogLevel::Error };
        let record = LogRecord::new(level, OPERATIONS_LOGGER, self.render(log))
            .with_location(&log.source_file, log.source_line)
            .with_created(log.start_time);
        if let Err(e) = self.target.emit(&record) {
            tracing::warn!(
                target: "aggregated_logging::operations",
                operation = %log.operation_name,
                error = %e,
                "operation output not delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::log::SubOperationLog;
    use crate::sink::MemorySink;
    use serde_json::Map;
    use std::panic::Location;

    fn sample_log() -> OperationLog {
        let mut log = OperationLog::new("load_file", Location::caller());
        for (name, ok) in [("read_header", true), ("parse_rows", false)] {
            let index = log.add_sub_operation(SubOperationLog::new(name, "file_data", Map::new()));
            if ok {
                log.sub_operations[index].mark_completed("dict");
            } else {
                log.sub_operations[index].mark_error("bad row 7");
            }
        }
        log.mark_error("ValueError: bad row 7".to_string());
        log
    }

    #[test]
    fn test_render_includes_header_table_and_error() {
        let sink = AggregatedOperationSink::new(Arc::new(MemorySink::new()));
        let text = sink.render(&sample_log());
        let first_line = text.lines().next().unwrap();
        assert!(first_line.starts_with("✗ load_file"));
        assert!(first_line.contains("2 sub-operations (1 failed)"));
        assert!(text.contains("read_header"));
        assert!(text.contains("bad row 7"));
        assert!(text.ends_with("Error: ValueError: bad row 7"));
    }

    #[test]
    fn test_record_operation_emits_and_measures() {
        let memory = Arc::new(MemorySink::new());
        let sink = AggregatedOperationSink::new(memory.clone());
        sink.record_operation(&sample_log());

        let records = memory.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[0].logger_name, "operations");

        let stats = sink.operation_statistics("load_file").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.failures, 1);
    }
}
