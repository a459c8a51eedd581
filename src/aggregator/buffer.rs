//! Thread-safe, size and time bounded record buffer
//!
//! Besides the main buffer that is drained on every flush, the manager keeps a
//! small rolling ring of recent records that survives flushes and feeds error
//! context analysis.

use crate::record::LogRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Capacity of the rolling context ring
pub const RECENT_CONTEXT_CAPACITY: usize = 50;

/// A record captured by the buffer
#[derive(Debug, Clone)]
pub struct BufferedLogRecord {
    pub record: LogRecord,
    pub buffered_at: DateTime<Utc>,
    /// Already forwarded downstream (e.g. as an expanded error)
    pub processed: bool,
}

impl BufferedLogRecord {
    pub fn new(record: LogRecord) -> Self {
        Self {
            record,
            buffered_at: Utc::now(),
            processed: false,
        }
    }

    pub fn processed(record: LogRecord) -> Self {
        Self {
            processed: true,
            ..Self::new(record)
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.record.created
    }
}

/// Counters exposed through the statistics surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferStatistics {
    pub current_size: usize,
    pub max_size: usize,
    pub flush_interval_secs: f64,
    pub recent_context_size: usize,
    pub total_records_added: u64,
    pub total_flushes: u64,
    pub total_records_processed: u64,
    pub seconds_since_last_flush: f64,
}

#[derive(Debug)]
struct BufferState {
    buffer: VecDeque<BufferedLogRecord>,
    recent: VecDeque<BufferedLogRecord>,
    last_flush: Instant,
    total_records_added: u64,
    total_flushes: u64,
    total_records_processed: u64,
}

/// Buffer shared by every thread emitting records
#[derive(Debug)]
pub struct BufferManager {
    max_size: usize,
    flush_interval: Duration,
    state: Mutex<BufferState>,
}

impl BufferManager {
    pub fn new(max_size: usize, flush_interval: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            flush_interval,
            state: Mutex::new(BufferState {
                buffer: VecDeque::with_capacity(max_size),
                recent: VecDeque::with_capacity(RECENT_CONTEXT_CAPACITY),
                last_flush: Instant::now(),
                total_records_added: 0,
                total_flushes: 0,
                total_records_processed: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer a fresh record
    pub fn add_record(&self, record: LogRecord) {
        self.add_buffered(BufferedLogRecord::new(record));
    }

    /// Buffer an already wrapped record, also pushing it onto the context ring
    pub fn add_buffered(&self, buffered: BufferedLogRecord) {
        let mut state = self.lock();
        if state.recent.len() >= RECENT_CONTEXT_CAPACITY {
            state.recent.pop_front();
        }
        state.recent.push_back(buffered.clone());
        state.buffer.push_back(buffered);
        state.total_records_added += 1;
    }

    /// True once the buffer is full or a non-empty buffer has aged past the flush interval
    pub fn should_process(&self) -> bool {
        let state = self.lock();
        if state.buffer.len() >= self.max_size {
            return true;
        }
        !state.buffer.is_empty() && state.last_flush.elapsed() >= self.flush_interval
    }

    /// Drain the buffer, resetting the flush clock
    pub fn get_records_for_processing(&self) -> Vec<BufferedLogRecord> {
        let mut state = self.lock();
        if state.buffer.is_empty() {
            return Vec::new();
        }
        let records: Vec<BufferedLogRecord> = state.buffer.drain(..).collect();
        state.last_flush = Instant::now();
        state.total_flushes += 1;
        state.total_records_processed += records.len() as u64;
        records
    }

    /// Up to `max_records` most recent records, oldest first
    pub fn get_recent_context(&self, max_records: usize) -> Vec<BufferedLogRecord> {
        let state = self.lock();
        let skip = state.recent.len().saturating_sub(max_records);
        state.recent.iter().skip(skip).cloned().collect()
    }

    pub fn get_buffer_size(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn clear_buffer(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.last_flush = Instant::now();
    }

    pub fn get_statistics(&self) -> BufferStatistics {
        let state = self.lock();
        BufferStatistics {
            current_size: state.buffer.len(),
            max_size: self.max_size,
            flush_interval_secs: self.flush_interval.as_secs_f64(),
            recent_context_size: state.recent.len(),
            total_records_added: state.total_records_added,
            total_flushes: state.total_flushes,
            total_records_processed: state.total_records_processed,
            seconds_since_last_flush: state.last_flush.elapsed().as_secs_f64(),
        }
    }

    pub fn reset_statistics(&self) {
        let mut state = self.lock();
        state.total_records_added = 0;
        state.total_flushes = 0;
        state.total_records_processed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use std::sync::Arc;
    use std::thread;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(LogLevel::Info, "buffer_test", message)
    }

    #[test]
    fn test_size_trigger() {
        let manager = BufferManager::new(2, Duration::from_secs(1000));
        assert!(!manager.should_process());
        manager.add_record(record("one"));
        assert!(!manager.should_process());
        manager.add_record(record("two"));
        assert!(manager.should_process());
    }

    #[test]
    fn test_time_trigger() {
        let manager = BufferManager::new(1000, Duration::from_millis(100));
        manager.add_record(record("one"));
        assert!(!manager.should_process());
        thread::sleep(Duration::from_millis(120));
        assert!(manager.should_process());
    }

    #[test]
    fn test_empty_buffer_never_triggers_on_time() {
        let manager = BufferManager::new(1000, Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert!(!manager.should_process());
    }

    #[test]
    fn test_drain_empties_buffer_and_counts() {
        let manager = BufferManager::new(100, Duration::from_secs(10));
        for i in 0..5 {
            manager.add_record(record(&format!("message {i}")));
        }
        let drained = manager.get_records_for_processing();
        assert_eq!(drained.len(), 5);
        assert_eq!(manager.get_buffer_size(), 0);
        assert!(manager.get_records_for_processing().is_empty());

        let stats = manager.get_statistics();
        assert_eq!(stats.total_flushes, 1);
        assert_eq!(stats.total_records_processed, 5);

        manager.reset_statistics();
        assert_eq!(manager.get_statistics().total_flushes, 0);
    }

    #[test]
    fn test_recent_context_survives_flush_and_is_bounded() {
        let manager = BufferManager::new(1000, Duration::from_secs(10));
        for i in 0..60 {
            manager.add_record(record(&format!("message {i}")));
        }
        manager.get_records_for_processing();

        let context = manager.get_recent_context(100);
        assert_eq!(context.len(), RECENT_CONTEXT_CAPACITY);
        assert_eq!(context[0].record.msg, "message 10");

        let last_three = manager.get_recent_context(3);
        assert_eq!(last_three.len(), 3);
        assert_eq!(last_three[2].record.msg, "message 59");
    }

    #[test]
    fn test_concurrent_adds() {
        let manager = Arc::new(BufferManager::new(10_000, Duration::from_secs(10)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    for i in 0..250 {
                        manager.add_record(record(&format!("thread {t} message {i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(manager.get_buffer_size(), 1000);
    }
}
