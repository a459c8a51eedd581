//! Operation cascade withholding
//!
//! Bursts of request-handling records (`OperationType.*`, `handle_request`,
//! `Request ...`/`Response ...`) are held back while they keep arriving within
//! the cascade window. A completed burst large enough to be worth folding is
//! replaced by one summary record; smaller ones are released unchanged.

use crate::record::{LogLevel, LogRecord};
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref OPERATION_TYPE_PATTERN: Regex = Regex::new(r"\bOperationType\.(\w+)").unwrap();
    static ref CASCADE_PREFIX_PATTERN: Regex =
        Regex::new(r"^\s*(?:Processing request|Request|Response)\b").unwrap();
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeStatistics {
    pub cascades_detected: u64,
    pub records_folded: u64,
    pub records_released: u64,
    pub largest_cascade: usize,
    pub pending: usize,
}

/// Tracks the cascade currently being withheld
#[derive(Debug)]
pub struct OperationAggregator {
    window: Duration,
    min_size: usize,
    max_size: usize,
    pending: Vec<LogRecord>,
    last_seen: Option<DateTime<Utc>>,
    stats: CascadeStatistics,
}

impl OperationAggregator {
    pub fn new(window_secs: f64, min_size: usize, max_size: usize) -> Self {
        Self {
            window: Duration::milliseconds((window_secs * 1000.0) as i64),
            min_size: min_size.max(2),
            max_size: max_size.max(min_size),
            pending: Vec::new(),
            last_seen: None,
            stats: CascadeStatistics::default(),
        }
    }

    pub fn from_config(config: &crate::config::AggregationConfig) -> Self {
        Self::new(config.cascade_window, config.min_cascade_size, config.max_cascade_size)
    }

    pub fn is_candidate(message: &str) -> bool {
        OPERATION_TYPE_PATTERN.is_match(message)
            || message.contains("handle_request")
            || CASCADE_PREFIX_PATTERN.is_match(message)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one record; returns the records now ready for the rest of the pipeline
    pub fn process(&mut self, record: LogRecord, message: &str) -> Vec<LogRecord> {
        if !Self::is_candidate(message) {
            let mut ready = self.complete();
            ready.push(record);
            return ready;
        }

        let mut ready = Vec::new();
        let gap_exceeded = self
            .last_seen
            .is_some_and(|last| record.created - last > self.window);
        if gap_exceeded {
            ready = self.complete();
        }

        self.last_seen = Some(record.created);
        self.pending.push(record);
        if self.pending.len() >= self.max_size {
            ready.extend(self.complete());
        }
        ready
    }

    /// Close the pending cascade, folding it when it is large enough
    pub fn complete(&mut self) -> Vec<LogRecord> {
        self.last_seen = None;
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return pending;
        }
        if pending.len() < self.min_size {
            self.stats.records_released += pending.len() as u64;
            return pending;
        }

        self.stats.cascades_detected += 1;
        self.stats.records_folded += pending.len() as u64;
        self.stats.largest_cascade = self.stats.largest_cascade.max(pending.len());
        vec![summarize(&pending)]
    }

    pub fn get_statistics(&self) -> CascadeStatistics {
        CascadeStatistics {
            pending: self.pending.len(),
            ..self.stats.clone()
        }
    }
}

fn operation_name(message: &str) -> String {
    if let Some(caps) = OPERATION_TYPE_PATTERN.captures(message) {
        return caps[1].to_string();
    }
    if message.contains("handle_request") {
        return "handle_request".to_string();
    }
    message
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

fn summarize(records: &[LogRecord]) -> LogRecord {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        let name = operation_name(&record.message());
        if names.last() != Some(&name) {
            names.push(name);
        }
    }

    let first = &records[0];
    let last = &records[records.len() - 1];
    let elapsed_ms = (last.created - first.created).num_milliseconds().max(0);
    let level = records
        .iter()
        .map(|record| record.level)
        .max()
        .unwrap_or(LogLevel::Info);

    LogRecord::new(
        level,
        &first.logger_name,
        format!(
            "🔄 Operation cascade: {} ({} records, {} ms)",
            names.join(" → "),
            records.len(),
            elapsed_ms
        ),
    )
    .with_created(first.created)
}
