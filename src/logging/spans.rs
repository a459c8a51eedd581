//! Structured spans for the pipeline's own diagnostics
//!
//! `OperationSpan` wraps one traced operation, `FlushSpan` one pass over the
//! aggregation buffer. Both emit their events on the crate's targets so the
//! aggregating layer never feeds them back into the handler.

use std::time::Instant;
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span for a traced operation and its sub-operations
pub struct OperationSpan {
    span: Span,
    start_time: Instant,
    operation_name: String,
}

impl OperationSpan {
    pub fn new(operation_name: &str, operation_id: Uuid) -> Self {
        let span = span!(
            target: "aggregated_logging::operations",
            Level::INFO,
            "operation",
            operation = operation_name,
            operation_id = %operation_id,
            sub_operations = field::Empty,
            success = field::Empty,
            execution_time_ms = field::Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    pub fn record_sub_operation(&self, step_number: usize, operation: &str, target: &str, ok: bool) {
        tracing::debug!(
            target: "aggregated_logging::operations",
            parent: &self.span,
            step = step_number,
            operation,
            dispatch_target = target,
            ok,
            "Sub-operation completed"
        );
    }

    pub fn record_completion(&self, success: bool, sub_operations: usize) {
        let duration = self.start_time.elapsed();
        self.span.record("sub_operations", sub_operations);
        self.span.record("success", success);
        self.span.record("execution_time_ms", duration.as_millis() as u64);

        tracing::debug!(
            target: "aggregated_logging::operations",
            parent: &self.span,
            operation = %self.operation_name,
            success,
            sub_operations,
            execution_time_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span for one pass over the aggregation buffer
pub struct FlushSpan {
    span: Span,
    start_time: Instant,
}

impl FlushSpan {
    pub fn new(buffered_records: usize, forced: bool) -> Self {
        let span = span!(
            target: "aggregated_logging::internal",
            Level::DEBUG,
            "buffer_flush",
            buffered_records,
            forced,
            groups = field::Empty,
            emitted = field::Empty,
        );

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_result(&self, groups: usize, emitted: usize) {
        self.span.record("groups", groups);
        self.span.record("emitted", emitted);

        tracing::debug!(
            target: "aggregated_logging::internal",
            parent: &self.span,
            groups,
            emitted,
            elapsed_us = self.start_time.elapsed().as_micros() as u64,
            "Buffer processed"
        );
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_span_without_subscriber() {
        let span = OperationSpan::new("load_file", Uuid::new_v4());
        let _enter = span.enter();
        span.record_sub_operation(1, "read_header", "file_data", true);
        span.record_completion(true, 1);
    }

    #[test]
    fn test_flush_span_records() {
        let span = FlushSpan::new(12, true);
        let _enter = span.enter();
        span.record_result(2, 5);
    }
}
