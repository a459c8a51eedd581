//! Structured trace of one instrumented operation

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::Location;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Success,
    Error,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Running => "running",
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubOperationStatus {
    #[serde(rename = "OK")]
    Ok,
    Error,
}

impl SubOperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubOperationStatus::Ok => "OK",
            SubOperationStatus::Error => "Error",
        }
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> f64 {
    end.unwrap_or_else(Utc::now)
        .signed_duration_since(start)
        .num_microseconds()
        .map_or(0.0, |micros| micros.max(0) as f64 / 1000.0)
}

/// One nested dispatch captured while a parent operation runs
#[derive(Debug, Clone, Serialize)]
pub struct SubOperationLog {
    pub step_number: usize,
    pub operation_name: String,
    pub target: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub request_kwargs: Map<String, Value>,
    pub response_data_type: Option<String>,
    pub status: SubOperationStatus,
    pub error_details: Option<String>,
}

impl SubOperationLog {
    pub fn new(operation_name: &str, target: &str, request_kwargs: Map<String, Value>) -> Self {
        Self {
            step_number: 0,
            operation_name: operation_name.to_string(),
            target: target.to_string(),
            start_time: Utc::now(),
            end_time: None,
            request_kwargs,
            response_data_type: None,
            status: SubOperationStatus::Ok,
            error_details: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Mark finished; a completed step is never modified again
    pub fn mark_completed(&mut self, response_data_type: &str) {
        if self.is_completed() {
            return;
        }
        self.end_time = Some(Utc::now());
        self.response_data_type = Some(response_data_type.to_string());
    }

    pub fn mark_error(&mut self, details: &str) {
        if self.is_completed() {
            return;
        }
        self.end_time = Some(Utc::now());
        self.status = SubOperationStatus::Error;
        self.error_details = Some(details.to_string());
    }

    pub fn duration_ms(&self) -> f64 {
        elapsed_ms(self.start_time, self.end_time)
    }
}

/// Root of the trace for one instrumented call
#[derive(Debug, Clone, Serialize)]
pub struct OperationLog {
    pub operation_id: Uuid,
    pub operation_name: String,
    pub source_file: String,
    pub source_line: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: OperationStatus,
    pub exception_info: Option<String>,
    pub sub_operations: Vec<SubOperationLog>,
}

impl OperationLog {
    pub fn new(operation_name: &str, location: &Location<'_>) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            operation_name: operation_name.to_string(),
            source_file: location.file().to_string(),
            source_line: location.line(),
            start_time: Utc::now(),
            end_time: None,
            status: OperationStatus::Running,
            exception_info: None,
            sub_operations: Vec::new(),
        }
    }

    /// Append a step, numbering it after the existing ones; returns its index
    pub fn add_sub_operation(&mut self, mut sub_operation: SubOperationLog) -> usize {
        sub_operation.step_number = self.sub_operations.len() + 1;
        self.sub_operations.push(sub_operation);
        self.sub_operations.len() - 1
    }

    pub fn mark_success(&mut self) {
        self.end_time = Some(Utc::now());
        self.status = OperationStatus::Success;
    }

    pub fn mark_error(&mut self, exception_info: String) {
        self.end_time = Some(Utc::now());
        self.status = OperationStatus::Error;
        self.exception_info = Some(exception_info);
    }

    pub fn duration_ms(&self) -> f64 {
        elapsed_ms(self.start_time, self.end_time)
    }

    pub fn failed_sub_operations(&self) -> usize {
        self.sub_operations
            .iter()
            .filter(|sub| sub.status == SubOperationStatus::Error)
            .count()
    }
}
