//! Realtime aggregating handler
//!
//! Sits in front of a downstream [`LogSink`]. Every record passes through value
//! compression and cascade withholding; error-level records are expanded and
//! forwarded at once, everything else is buffered and, on flush, folded into
//! aggregated or tabular records. Internal failures never cost a record: the
//! original is forwarded and a circuit breaker switches off the optional stages
//! when failures pile up.

use super::buffer::{BufferManager, BufferedLogRecord, RECENT_CONTEXT_CAPACITY};
use super::cascade::OperationAggregator;
use super::engine::AggregationEngine;
use super::errors::ErrorExpansionEngine;
use super::patterns::PatternDetector;
use super::tables::TabularFormatter;
use super::values::ValueAggregator;
use crate::config::AggregationConfig;
use crate::error::Result;
use crate::logging::spans::FlushSpan;
use crate::record::{panic_detail, safe_get_message, LogLevel, LogRecord};
use crate::sink::LogSink;
use serde::Serialize;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

const INTERNAL_TARGET: &str = "aggregated_logging::internal";
const HANDLER_LOGGER: &str = "aggregated_logging";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn section<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "serialization_error": e.to_string() }))
}

thread_local! {
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a handler as holding its stage lock on this thread
///
/// Records a sink logs back into the same handler during a flush are forwarded
/// unchanged; going through the pipeline would wait on the stage lock this
/// thread already holds.
struct DeliveryGuard {
    handler: usize,
}

impl DeliveryGuard {
    fn enter(handler: &RealtimeAggregatingHandler) -> Self {
        let handler = handler as *const RealtimeAggregatingHandler as usize;
        DELIVERING.with(|active| active.borrow_mut().push(handler));
        Self { handler }
    }

    fn is_active(handler: &RealtimeAggregatingHandler) -> bool {
        let handler = handler as *const RealtimeAggregatingHandler as usize;
        DELIVERING.with(|active| active.borrow().contains(&handler))
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        DELIVERING.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(index) = active.iter().rposition(|h| *h == self.handler) {
                active.remove(index);
            }
        });
    }
}

/// Stages that only run under the processing lock
struct FlushStages {
    detector: PatternDetector,
    engine: AggregationEngine,
    tables: TabularFormatter,
}

struct CircuitBreaker {
    count: usize,
    window_start: Instant,
    degraded: bool,
    last_error: Option<String>,
}

#[derive(Default)]
struct HandlerCounters {
    records_received: AtomicU64,
    records_forwarded: AtomicU64,
    errors_expanded: AtomicU64,
    aggregated_emitted: AtomicU64,
    tables_emitted: AtomicU64,
    internal_errors: AtomicU64,
    flushes: AtomicU64,
}

impl HandlerCounters {
    fn reset(&self) {
        for counter in [
            &self.records_received,
            &self.records_forwarded,
            &self.errors_expanded,
            &self.aggregated_emitted,
            &self.tables_emitted,
            &self.internal_errors,
            &self.flushes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Output of one flush: replacement records keyed by the first folded member
#[derive(Default)]
struct FlushPlan {
    outputs: Vec<(u64, LogRecord)>,
    folded: HashSet<u64>,
}

/// Log handler that aggregates records before forwarding them to a sink
pub struct RealtimeAggregatingHandler {
    target: Arc<dyn LogSink>,
    config: AggregationConfig,
    enabled: AtomicBool,
    tabular_enabled: AtomicBool,
    operation_aggregation_enabled: AtomicBool,
    value_aggregation_enabled: AtomicBool,
    closed: AtomicBool,
    buffer: BufferManager,
    values: ValueAggregator,
    errors: ErrorExpansionEngine,
    cascade: Mutex<OperationAggregator>,
    stages: Mutex<FlushStages>,
    breaker: Mutex<CircuitBreaker>,
    counters: HandlerCounters,
}

impl RealtimeAggregatingHandler {
    pub fn new(target: Arc<dyn LogSink>, config: AggregationConfig) -> Result<Self> {
        config.validate()?;

        let stages = FlushStages {
            detector: PatternDetector::new(config.pattern_similarity_threshold, config.min_pattern_entries),
            engine: AggregationEngine::new(config.min_pattern_entries),
            tables: TabularFormatter::from_config(&config),
        };

        debug!(
            target: INTERNAL_TARGET,
            buffer_size = config.buffer_size,
            flush_interval = config.flush_interval,
            forward_originals = config.forward_originals,
            "aggregating handler created"
        );

        Ok(Self {
            target,
            enabled: AtomicBool::new(config.enabled),
            tabular_enabled: AtomicBool::new(config.tabular_formatting_enabled),
            operation_aggregation_enabled: AtomicBool::new(config.operation_aggregation_enabled),
            value_aggregation_enabled: AtomicBool::new(config.value_aggregation_enabled),
            closed: AtomicBool::new(false),
            buffer: BufferManager::new(config.buffer_size, config.flush_interval_duration()),
            values: ValueAggregator::from_config(&config),
            errors: ErrorExpansionEngine::from_config(&config),
            cascade: Mutex::new(OperationAggregator::from_config(&config)),
            stages: Mutex::new(stages),
            breaker: Mutex::new(CircuitBreaker {
                count: 0,
                window_start: Instant::now(),
                degraded: false,
                last_error: None,
            }),
            counters: HandlerCounters::default(),
            config,
        })
    }

    /// Handler configured from a named preset
    pub fn with_preset(target: Arc<dyn LogSink>, preset: &str) -> Result<Self> {
        Self::new(target, AggregationConfig::preset(preset)?)
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Records waiting in the buffer
    pub fn buffered_records(&self) -> usize {
        self.buffer.get_buffer_size()
    }

    /// Handle one record; never fails and never drops the record
    pub fn emit(&self, record: &LogRecord) {
        self.counters.records_received.fetch_add(1, Ordering::Relaxed);

        if !self.is_enabled() || self.closed.load(Ordering::Relaxed) || DeliveryGuard::is_active(self) {
            if let Err(e) = self.forward(record) {
                warn!(target: INTERNAL_TARGET, error = %e, "direct forward failed");
            }
            return;
        }

        let mut handed_off = false;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.process_record(record.clone(), &mut handed_off)));
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panic: {}", panic_detail(payload.as_ref())),
        };

        self.record_internal_error(&failure);
        if !handed_off {
            if let Err(e) = self.forward(record) {
                warn!(target: INTERNAL_TARGET, error = %e, "fallback forward failed");
            }
        }
    }

    fn process_record(&self, record: LogRecord, handed_off: &mut bool) -> Result<()> {
        let record = if self.value_aggregation_enabled.load(Ordering::Relaxed) {
            match self.values.compress_record(&record) {
                Some(compressed) => record.with_message(compressed),
                None => record,
            }
        } else {
            record
        };

        // Error-level records never join a cascade: the pending one is closed
        // and released ahead of the error so it keeps its own text
        let ready = if !self.operation_aggregation_enabled.load(Ordering::Relaxed) {
            *handed_off = true;
            vec![record]
        } else if record.level >= self.config.error_threshold_level {
            *handed_off = true;
            let mut ready = lock(&self.cascade).complete();
            ready.push(record);
            ready
        } else {
            let message = safe_get_message(&record);
            *handed_off = true;
            lock(&self.cascade).process(record, &message)
        };

        self.route_all(ready)
    }

    /// Route every record, reporting the first failure after trying them all
    fn route_all(&self, records: Vec<LogRecord>) -> Result<()> {
        let mut first_error = None;
        for record in records {
            if let Err(e) = self.route(record) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn route(&self, record: LogRecord) -> Result<()> {
        if record.level >= self.config.error_threshold_level {
            // Earlier records go out first so the error keeps its place
            let flushed = if self.config.forward_originals {
                Ok(0)
            } else {
                self.process_buffer(false)
            };
            let forwarded = self.forward(&self.expand_if_error(&record));
            self.buffer.add_buffered(BufferedLogRecord::processed(record));
            return flushed.and(forwarded).and(self.process_if_due());
        }

        let forwarded = if self.config.forward_originals {
            self.forward(&record)
        } else {
            Ok(())
        };
        self.buffer.add_record(record);
        forwarded.and(self.process_if_due())
    }

    fn process_if_due(&self) -> Result<()> {
        if self.buffer.should_process() {
            self.process_buffer(false).map(|_| ())
        } else {
            Ok(())
        }
    }

    fn expand_if_error(&self, record: &LogRecord) -> LogRecord {
        if !self.errors.is_error_record(record) {
            return record.clone();
        }
        let recent = self.buffer.get_recent_context(RECENT_CONTEXT_CAPACITY);
        let full_message = if self.value_aggregation_enabled.load(Ordering::Relaxed) {
            self.values.get_full_context(record)
        } else {
            None
        };
        let expanded = self.errors.expand(record, &recent, full_message);
        self.counters.errors_expanded.fetch_add(1, Ordering::Relaxed);
        record.with_message(expanded)
    }

    fn forward(&self, record: &LogRecord) -> Result<()> {
        self.target.emit(record)?;
        self.counters.records_forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drain the buffer through detection, aggregation and table formatting
    ///
    /// The stage lock is held until the batch is delivered so flushes from
    /// different threads never interleave. Returns the number of records
    /// forwarded.
    fn process_buffer(&self, forced: bool) -> Result<usize> {
        let mut stages = lock(&self.stages);
        let _delivering = DeliveryGuard::enter(self);
        let drained = self.buffer.get_records_for_processing();
        if drained.is_empty() {
            return Ok(0);
        }
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        let span = FlushSpan::new(drained.len(), forced);
        let _enter = span.enter();

        let candidates: Vec<BufferedLogRecord> = drained.into_iter().filter(|b| !b.processed).collect();
        let plan = match catch_unwind(AssertUnwindSafe(|| self.plan_flush(&mut stages, &candidates))) {
            Ok(plan) => plan,
            Err(payload) => {
                self.record_internal_error(&format!("flush panic: {}", panic_detail(payload.as_ref())));
                FlushPlan::default()
            }
        };
        let groups = plan.outputs.len();
        let outgoing = self.order_outputs(plan, candidates);

        let mut emitted = 0;
        let mut first_error = None;
        for record in &outgoing {
            match self.forward(record) {
                Ok(()) => emitted += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        span.record_result(groups, emitted);
        first_error.map_or(Ok(emitted), Err)
    }

    /// Records to forward for one flush, in buffer order
    fn order_outputs(&self, plan: FlushPlan, candidates: Vec<BufferedLogRecord>) -> Vec<LogRecord> {
        if self.config.forward_originals {
            return plan.outputs.into_iter().map(|(_, output)| output).collect();
        }

        let mut outputs: HashMap<u64, LogRecord> = plan.outputs.into_iter().collect();
        let mut ordered = Vec::with_capacity(candidates.len());
        for buffered in candidates {
            let id = buffered.record.id;
            if let Some(output) = outputs.remove(&id) {
                ordered.push(output);
            } else if !plan.folded.contains(&id) {
                ordered.push(buffered.record);
            }
        }
        ordered
    }

    fn plan_flush(&self, stages: &mut FlushStages, candidates: &[BufferedLogRecord]) -> FlushPlan {
        let mut plan = FlushPlan::default();
        if candidates.len() < 2 {
            return plan;
        }

        let position: HashMap<u64, usize> = candidates
            .iter()
            .enumerate()
            .map(|(index, buffered)| (buffered.record.id, index))
            .collect();
        let tabular = self.tabular_enabled.load(Ordering::Relaxed);

        for group in stages.detector.detect_pattern_groups(candidates) {
            let members: Vec<u64> = group
                .record_ids()
                .into_iter()
                .filter(|id| position.contains_key(id) && !plan.folded.contains(id))
                .collect();
            let Some(&anchor) = members.iter().min_by_key(|id| position[*id]) else {
                continue;
            };

            let output = if tabular && stages.tables.should_format(&group) {
                let record = match stages.tables.format_pattern_group(&group) {
                    Ok(record) => record,
                    Err(e) => stages.tables.error_record(&group, &e),
                };
                self.counters.tables_emitted.fetch_add(1, Ordering::Relaxed);
                record
            } else {
                self.counters.aggregated_emitted.fetch_add(1, Ordering::Relaxed);
                stages.engine.aggregate_group(&group).to_log_record()
            };

            plan.folded.extend(members);
            plan.outputs.push((anchor, output));
        }
        plan
    }

    /// Release withheld cascades and process everything buffered
    pub fn flush(&self) -> Result<()> {
        let released = lock(&self.cascade).complete();
        let routed = self.route_all(released);
        if let Err(e) = &routed {
            self.record_internal_error(&e.to_string());
        }
        if let Err(e) = self.process_buffer(true) {
            self.record_internal_error(&e.to_string());
        }
        self.target.flush()
    }

    /// Flush once and forward later records unchanged
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Ok(());
        }
        let result = self.flush();
        self.closed.store(true, Ordering::Relaxed);
        result
    }

    fn record_internal_error(&self, detail: &str) {
        self.counters.internal_errors.fetch_add(1, Ordering::Relaxed);
        warn!(target: INTERNAL_TARGET, error = %detail, "aggregation pipeline error");

        let tripped = {
            let mut breaker = lock(&self.breaker);
            if breaker.window_start.elapsed() >= self.config.error_reset_duration() {
                breaker.count = 0;
                breaker.window_start = Instant::now();
            }
            breaker.count += 1;
            breaker.last_error = Some(detail.to_string());
            if breaker.count > self.config.max_internal_errors && !breaker.degraded {
                breaker.degraded = true;
                Some(breaker.count)
            } else {
                None
            }
        };

        if let Some(count) = tripped {
            self.degrade(count);
        }
    }

    fn degrade(&self, count: usize) {
        self.errors.set_enabled(false);
        self.value_aggregation_enabled.store(false, Ordering::Relaxed);

        let message = format!(
            "[AGGREGATOR DEGRADED] {} internal errors within {}s; error expansion and value aggregation disabled",
            count, self.config.error_reset_interval
        );
        warn!(target: INTERNAL_TARGET, internal_errors = count, "aggregator degraded");
        if let Err(e) = self.forward(&LogRecord::new(LogLevel::Warning, HANDLER_LOGGER, message)) {
            debug!(target: INTERNAL_TARGET, error = %e, "degradation notice not delivered");
        }
    }

    fn reset_breaker(&self) {
        let mut breaker = lock(&self.breaker);
        breaker.count = 0;
        breaker.window_start = Instant::now();
        breaker.degraded = false;
    }

    pub fn is_degraded(&self) -> bool {
        lock(&self.breaker).degraded
    }

    /// Turn the whole pipeline on or off; disabling flushes what is pending
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::Relaxed);
        if was_enabled && !enabled {
            if let Err(e) = self.flush() {
                warn!(target: INTERNAL_TARGET, error = %e, "flush on disable failed");
            }
        }
    }

    pub fn toggle_tabular_format(&self, enabled: bool) {
        self.tabular_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn toggle_error_expansion(&self, enabled: bool) {
        self.errors.set_enabled(enabled);
        if enabled {
            self.reset_breaker();
        }
    }

    /// Disabling releases any withheld cascade
    pub fn toggle_operation_aggregation(&self, enabled: bool) {
        let was_enabled = self.operation_aggregation_enabled.swap(enabled, Ordering::Relaxed);
        if was_enabled && !enabled {
            let released = lock(&self.cascade).complete();
            if let Err(e) = self.route_all(released) {
                self.record_internal_error(&e.to_string());
            }
        }
    }

    pub fn toggle_value_aggregation(&self, enabled: bool) {
        self.value_aggregation_enabled.store(enabled, Ordering::Relaxed);
        if enabled {
            self.reset_breaker();
        }
    }

    /// Nested counters from every stage
    pub fn get_statistics(&self) -> Value {
        let (patterns, aggregation, tables) = {
            let stages = lock(&self.stages);
            (
                section(stages.detector.statistics()),
                section(stages.engine.get_statistics()),
                section(stages.tables.get_statistics()),
            )
        };
        let cascades = section(lock(&self.cascade).get_statistics());

        json!({
            "handler": self.handler_section(),
            "buffer": section(self.buffer.get_statistics()),
            "patterns": patterns,
            "aggregation": aggregation,
            "error_expansion": section(self.errors.get_statistics()),
            "tables": tables,
            "values": section(self.values.get_statistics()),
            "cascades": cascades,
            "config": section(&self.config),
        })
    }

    /// Only the pattern and aggregation sections
    pub fn get_aggregation_stats(&self) -> Value {
        let stages = lock(&self.stages);
        json!({
            "aggregation": section(stages.engine.get_statistics()),
            "patterns": section(stages.detector.statistics()),
        })
    }

    fn handler_section(&self) -> Value {
        let counters = &self.counters;
        let (degraded, window_errors, last_error) = {
            let breaker = lock(&self.breaker);
            (breaker.degraded, breaker.count, breaker.last_error.clone())
        };
        json!({
            "enabled": self.is_enabled(),
            "records_received": counters.records_received.load(Ordering::Relaxed),
            "records_forwarded": counters.records_forwarded.load(Ordering::Relaxed),
            "errors_expanded": counters.errors_expanded.load(Ordering::Relaxed),
            "aggregated_records_emitted": counters.aggregated_emitted.load(Ordering::Relaxed),
            "tables_emitted": counters.tables_emitted.load(Ordering::Relaxed),
            "flushes": counters.flushes.load(Ordering::Relaxed),
            "internal_errors": counters.internal_errors.load(Ordering::Relaxed),
            "internal_errors_in_window": window_errors,
            "last_internal_error": last_error,
            "degraded": degraded,
            "forward_originals": self.config.forward_originals,
            "error_expansion_enabled": self.errors.is_enabled(),
            "tabular_formatting_enabled": self.tabular_enabled.load(Ordering::Relaxed),
            "operation_aggregation_enabled": self.operation_aggregation_enabled.load(Ordering::Relaxed),
            "value_aggregation_enabled": self.value_aggregation_enabled.load(Ordering::Relaxed),
        })
    }

    pub fn reset_statistics(&self) {
        self.counters.reset();
        self.buffer.reset_statistics();
        let mut stages = lock(&self.stages);
        stages.detector.reset_statistics();
        stages.engine.reset_statistics();
    }
}

impl LogSink for RealtimeAggregatingHandler {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        RealtimeAggregatingHandler::emit(self, record);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        RealtimeAggregatingHandler::flush(self)
    }
}

impl Drop for RealtimeAggregatingHandler {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: INTERNAL_TARGET, error = %e, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_INTERVAL_SECS;
    use crate::sink::{FailingSink, MemorySink};
    use std::sync::mpsc;
    use std::sync::{OnceLock, Weak};
    use std::thread;
    use std::time::Duration;

    fn handler_with(config: AggregationConfig) -> (Arc<MemorySink>, RealtimeAggregatingHandler) {
        let sink = Arc::new(MemorySink::new());
        let handler = RealtimeAggregatingHandler::new(sink.clone(), config).unwrap();
        (sink, handler)
    }

    fn quiet_config() -> AggregationConfig {
        AggregationConfig {
            buffer_size: 1000,
            flush_interval: 3600.0,
            ..AggregationConfig::default()
        }
    }

    #[test]
    fn test_disabled_handler_forwards_unchanged() {
        let (sink, handler) = handler_with(AggregationConfig {
            enabled: false,
            ..quiet_config()
        });
        handler.emit(&LogRecord::new(LogLevel::Info, "app", "plain"));
        assert_eq!(sink.messages(), vec!["plain"]);
    }

    #[test]
    fn test_non_error_records_wait_for_flush() {
        let (sink, handler) = handler_with(quiet_config());
        handler.emit(&LogRecord::new(LogLevel::Info, "app", "App starting"));
        assert!(sink.is_empty());
        assert_eq!(handler.buffered_records(), 1);

        handler.flush().unwrap();
        assert_eq!(sink.messages(), vec!["App starting"]);
        assert_eq!(handler.buffered_records(), 0);
    }

    #[test]
    fn test_similar_records_fold_into_one() {
        let (sink, handler) = handler_with(AggregationConfig {
            tabular_formatting_enabled: false,
            ..quiet_config()
        });
        handler.emit(&LogRecord::new(LogLevel::Info, "app", "Startup"));
        for i in 0..4 {
            handler.emit(&LogRecord::new(LogLevel::Info, "app.worker", format!("Processed batch {i} of items")));
        }
        handler.flush().unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], "Startup");
        assert!(messages[1].contains("[x4 over"), "{}", messages[1]);
    }

    #[test]
    fn test_error_flushes_earlier_records_first() {
        let (sink, handler) = handler_with(quiet_config());
        handler.emit(&LogRecord::new(LogLevel::Info, "app", "App starting"));
        handler.emit(&LogRecord::new(LogLevel::Error, "app", "ERROR: File not found: data.csv"));

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], "App starting");
        assert!(messages[1].contains("DETAILED ERROR ANALYSIS"));

        handler.flush().unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_forward_originals_mode_adds_supplementary_records() {
        let (sink, handler) = handler_with(AggregationConfig {
            forward_originals: true,
            tabular_formatting_enabled: false,
            ..quiet_config()
        });
        for i in 0..3 {
            handler.emit(&LogRecord::new(LogLevel::Info, "app", format!("Cache sweep {i} finished")));
        }
        assert_eq!(sink.len(), 3);
        handler.flush().unwrap();
        assert_eq!(sink.len(), 4);
    }

    #[test]
    fn test_circuit_breaker_degrades() {
        let handler = RealtimeAggregatingHandler::new(
            Arc::new(FailingSink),
            AggregationConfig {
                max_internal_errors: 2,
                ..quiet_config()
            },
        )
        .unwrap();
        for _ in 0..4 {
            handler.emit(&LogRecord::new(LogLevel::Error, "app", "boom"));
        }
        assert!(handler.is_degraded());

        let stats = handler.get_statistics();
        assert_eq!(stats["handler"]["degraded"], true);
        assert_eq!(stats["handler"]["error_expansion_enabled"], false);
        assert_eq!(stats["handler"]["value_aggregation_enabled"], false);

        handler.toggle_error_expansion(true);
        assert!(!handler.is_degraded());
    }

    #[test]
    fn test_error_records_keep_forward_originals_buffer_bounded() {
        let (sink, handler) = handler_with(AggregationConfig {
            buffer_size: 10,
            flush_interval: 3600.0,
            ..AggregationConfig::backward_compatibility()
        });
        for i in 0..1000 {
            handler.emit(&LogRecord::new(LogLevel::Warning, "app", format!("Queue depth {i} above limit")));
            assert!(handler.buffered_records() <= 10);
        }
        assert_eq!(sink.len(), 1000);
        assert_eq!(sink.messages()[999], "Queue depth 999 above limit");
    }

    #[test]
    fn test_breaker_window_resets_after_interval() {
        let handler = RealtimeAggregatingHandler::new(
            Arc::new(FailingSink),
            AggregationConfig {
                max_internal_errors: 2,
                error_reset_interval: 0.05,
                ..quiet_config()
            },
        )
        .unwrap();

        for _ in 0..2 {
            handler.emit(&LogRecord::new(LogLevel::Error, "app", "boom"));
        }
        thread::sleep(Duration::from_millis(80));
        for _ in 0..2 {
            handler.emit(&LogRecord::new(LogLevel::Error, "app", "boom"));
        }

        assert!(!handler.is_degraded());
        let stats = handler.get_statistics();
        assert_eq!(stats["handler"]["internal_errors"], 4);
        assert_eq!(stats["handler"]["internal_errors_in_window"], 2);
    }

    #[test]
    fn test_longest_reset_interval_does_not_panic() {
        let handler = RealtimeAggregatingHandler::new(
            Arc::new(FailingSink),
            AggregationConfig {
                error_reset_interval: MAX_INTERVAL_SECS,
                flush_interval: MAX_INTERVAL_SECS,
                ..quiet_config()
            },
        )
        .unwrap();
        handler.emit(&LogRecord::new(LogLevel::Error, "app", "boom"));
        assert_eq!(handler.get_statistics()["handler"]["internal_errors"], 1);

        let rejected = RealtimeAggregatingHandler::new(
            Arc::new(MemorySink::new()),
            AggregationConfig {
                error_reset_interval: 1e30,
                ..quiet_config()
            },
        );
        assert!(rejected.is_err());
    }

    /// Sink that logs one record back into its handler the first time it sees `trigger`
    struct EchoSink {
        inner: MemorySink,
        handler: OnceLock<Weak<RealtimeAggregatingHandler>>,
        echoed: AtomicBool,
        trigger: &'static str,
    }

    impl LogSink for EchoSink {
        fn emit(&self, record: &LogRecord) -> Result<()> {
            self.inner.emit(record)?;
            if safe_get_message(record) == self.trigger && !self.echoed.swap(true, Ordering::SeqCst) {
                if let Some(handler) = self.handler.get().and_then(Weak::upgrade) {
                    handler.emit(&LogRecord::new(LogLevel::Warning, "downstream", "Echo from sink"));
                }
            }
            Ok(())
        }
    }

    fn echo_handler(trigger: &'static str) -> (Arc<EchoSink>, Arc<RealtimeAggregatingHandler>) {
        let sink = Arc::new(EchoSink {
            inner: MemorySink::new(),
            handler: OnceLock::new(),
            echoed: AtomicBool::new(false),
            trigger,
        });
        let handler = Arc::new(RealtimeAggregatingHandler::new(sink.clone(), quiet_config()).unwrap());
        let _ = sink.handler.set(Arc::downgrade(&handler));
        (sink, handler)
    }

    #[test]
    fn test_sink_logging_back_during_flush_completes() {
        let (sink, handler) = echo_handler("Starting");
        handler.emit(&LogRecord::new(LogLevel::Info, "app", "Starting"));
        handler.emit(&LogRecord::new(LogLevel::Info, "app.config", "Loading config"));

        let (done_tx, done_rx) = mpsc::channel();
        let flushing = Arc::clone(&handler);
        thread::spawn(move || {
            let result = flushing.flush();
            let _ = done_tx.send(result.is_ok());
        });
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(true));

        assert_eq!(
            sink.inner.messages(),
            vec!["Starting", "Echo from sink", "Loading config"]
        );
        assert_eq!(handler.buffered_records(), 0);
    }

    #[test]
    fn test_sink_logging_back_during_error_forward() {
        let (sink, handler) = echo_handler("Warm-up done");
        handler.emit(&LogRecord::new(LogLevel::Info, "app", "Warm-up done"));
        handler.emit(&LogRecord::new(LogLevel::Error, "app.io", "File not found: data.csv"));

        let messages = sink.inner.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], "Warm-up done");
        assert_eq!(messages[1], "Echo from sink");
        assert!(messages[2].contains("Classification: file_not_found"));
    }

    #[test]
    fn test_statistics_sections() {
        let (_sink, handler) = handler_with(quiet_config());
        handler.emit(&LogRecord::new(LogLevel::Info, "app", "hello"));
        let stats = handler.get_statistics();
        for key in [
            "handler",
            "buffer",
            "patterns",
            "aggregation",
            "error_expansion",
            "tables",
            "values",
            "cascades",
            "config",
        ] {
            assert!(stats.get(key).is_some(), "missing section {key}");
        }
        assert_eq!(stats["handler"]["records_received"], 1);

        let aggregation = handler.get_aggregation_stats();
        assert!(aggregation.get("aggregation").is_some());
        assert!(aggregation.get("buffer").is_none());
    }
}
