//! Operation duration metrics
//!
//! Collects one measurement per finished operation, keyed by operation name and
//! correlated by operation id, and summarizes them statistically.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

const MAX_MEASUREMENTS: usize = 10_000;

/// Individual operation measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMeasurement {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub operation_id: Option<Uuid>,
    pub success: bool,
}

/// Statistical summary of one operation's durations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub operation: String,
    pub count: usize,
    pub failures: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl PerformanceStats {
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.count - self.failures) as f64 / self.count as f64
    }
}

/// Thread-safe metrics collector
#[derive(Debug)]
pub struct MetricsCollector {
    measurements: Mutex<Vec<OperationMeasurement>>,
    enabled: bool,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            measurements: Mutex::new(Vec::new()),
            enabled,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OperationMeasurement>> {
        self.measurements.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a finished operation
    pub fn record(&self, operation: &str, duration: Duration, operation_id: Option<Uuid>, success: bool) {
        self.record_ms(operation, duration.as_secs_f64() * 1000.0, operation_id, success);
    }

    pub fn record_ms(&self, operation: &str, duration_ms: f64, operation_id: Option<Uuid>, success: bool) {
        if !self.enabled {
            return;
        }

        let measurement = OperationMeasurement {
            operation: operation.to_string(),
            duration_ms,
            timestamp: chrono::Utc::now(),
            operation_id,
            success,
        };

        let mut measurements = self.lock();
        measurements.push(measurement);

        // Keep growth bounded by dropping the oldest half
        if measurements.len() > MAX_MEASUREMENTS {
            measurements.drain(0..MAX_MEASUREMENTS / 2);
        }
    }

    pub fn get_measurements(&self, operation: &str) -> Vec<OperationMeasurement> {
        self.lock()
            .iter()
            .filter(|m| m.operation == operation)
            .cloned()
            .collect()
    }

    pub fn get_measurements_by_operation_id(&self, operation_id: Uuid) -> Vec<OperationMeasurement> {
        self.lock()
            .iter()
            .filter(|m| m.operation_id == Some(operation_id))
            .cloned()
            .collect()
    }

    /// Distinct operation names, sorted
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().iter().map(|m| m.operation.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// Calculate duration statistics for an operation
    pub fn calculate_stats(&self, operation: &str) -> Option<PerformanceStats> {
        let measurements = self.get_measurements(operation);
        if measurements.is_empty() {
            return None;
        }

        let failures = measurements.iter().filter(|m| !m.success).count();
        let mut durations: Vec<f64> = measurements.iter().map(|m| m.duration_ms).collect();
        durations.sort_by(|a, b| a.total_cmp(b));

        let count = durations.len();
        let mean = durations.iter().sum::<f64>() / count as f64;
        let variance = durations
            .iter()
            .map(|d| {
                let diff = d - mean;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        let median = if count % 2 == 0 {
            (durations[count / 2 - 1] + durations[count / 2]) / 2.0
        } else {
            durations[count / 2]
        };

        let p95_index = ((count as f64) * 0.95) as usize;
        let p99_index = ((count as f64) * 0.99) as usize;

        Some(PerformanceStats {
            operation: operation.to_string(),
            count,
            failures,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: durations[0],
            max_ms: durations[count - 1],
            p95_ms: durations[p95_index.min(count - 1)],
            p99_ms: durations[p99_index.min(count - 1)],
        })
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn measurement_count(&self) -> usize {
        self.lock().len()
    }

    pub fn export_to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.lock())
    }
}

/// Measures elapsed time until stopped
pub struct Timer {
    start: Instant,
    operation: String,
    operation_id: Option<Uuid>,
}

impl Timer {
    pub fn start(operation: &str, operation_id: Option<Uuid>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            operation_id,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop and record into `collector`
    pub fn stop(self, collector: &MetricsCollector, success: bool) -> Duration {
        let duration = self.start.elapsed();
        collector.record(&self.operation, duration, self.operation_id, success);

        tracing::debug!(
            target: "aggregated_logging::operations",
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            operation_id = ?self.operation_id,
            success,
            "Timer completed"
        );

        duration
    }
}
