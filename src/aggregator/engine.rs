//! Aggregation engine: folds detected patterns into compact summary records

use super::buffer::BufferedLogRecord;
use super::patterns::{LogPattern, PatternGroup, PatternMetadata, PatternType};
use crate::logging::formatters::utils::format_duration;
use crate::record::{safe_get_message, LogLevel, LogRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of sample messages kept per aggregated record
pub const MAX_SAMPLE_MESSAGES: usize = 3;

/// Items listed before a type-specific template is truncated
const MAX_LISTED_ITEMS: usize = 3;

/// Compact representation of one pattern
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedLogRecord {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub template: String,
    pub count: usize,
    pub level: LogLevel,
    pub logger_name: String,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    pub sample_messages: Vec<String>,
    /// Identity of every folded record
    #[serde(skip)]
    pub record_ids: Vec<u64>,
}

impl AggregatedLogRecord {
    pub fn duration_ms(&self) -> f64 {
        (self.last_timestamp - self.first_timestamp)
            .num_microseconds()
            .map_or(0.0, |micros| micros as f64 / 1000.0)
    }

    /// Single-line message forwarded downstream
    pub fn render(&self) -> String {
        let mut message = format!(
            "{} [x{} over {}]",
            self.template,
            self.count,
            format_duration(self.duration_ms())
        );
        if self.pattern_type == PatternType::BasicSimilarity && self.sample_messages.len() > 1 {
            let samples: Vec<String> = self
                .sample_messages
                .iter()
                .map(|sample| format!("\"{sample}\""))
                .collect();
            message.push_str(" | samples: ");
            message.push_str(&samples.join(", "));
        }
        message
    }

    /// Record to forward in place of the folded originals
    pub fn to_log_record(&self) -> LogRecord {
        LogRecord::new(self.level, &self.logger_name, self.render()).with_created(self.first_timestamp)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatistics {
    pub total_patterns_processed: u64,
    pub total_records_aggregated: u64,
    pub total_aggregations_created: u64,
    pub average_records_per_aggregation: f64,
    pub aggregation_rate: f64,
}

/// Turns patterns and pattern groups into [`AggregatedLogRecord`]s
#[derive(Debug)]
pub struct AggregationEngine {
    min_pattern_entries: usize,
    total_patterns_processed: u64,
    total_records_aggregated: u64,
    total_aggregations_created: u64,
}

impl AggregationEngine {
    pub fn new(min_pattern_entries: usize) -> Self {
        Self {
            min_pattern_entries: min_pattern_entries.max(2),
            total_patterns_processed: 0,
            total_records_aggregated: 0,
            total_aggregations_created: 0,
        }
    }

    pub fn aggregate_patterns(&mut self, patterns: &[LogPattern]) -> Vec<AggregatedLogRecord> {
        self.total_patterns_processed += patterns.len() as u64;
        let min = self.min_pattern_entries;
        patterns
            .iter()
            .filter(|pattern| pattern.records.len() >= min)
            .map(|pattern| {
                let aggregated = self.build(
                    pattern.pattern_id.clone(),
                    PatternType::BasicSimilarity,
                    pattern.template.clone(),
                    &pattern.records,
                );
                self.record_created(&aggregated);
                aggregated
            })
            .collect()
    }

    pub fn aggregate_pattern_groups(&mut self, groups: &[PatternGroup]) -> Vec<AggregatedLogRecord> {
        self.total_patterns_processed += groups.len() as u64;
        let min = self.min_pattern_entries;
        groups
            .iter()
            .filter(|group| group.records.len() >= min)
            .map(|group| self.aggregate_group(group))
            .collect()
    }

    /// Aggregate one typed group, ignoring the minimum size
    pub fn aggregate_group(&mut self, group: &PatternGroup) -> AggregatedLogRecord {
        let aggregated = self.build(
            group.pattern_id.clone(),
            group.pattern_type,
            group_template(group),
            &group.records,
        );
        self.record_created(&aggregated);
        aggregated
    }

    fn build(
        &self,
        pattern_id: String,
        pattern_type: PatternType,
        template: String,
        records: &[BufferedLogRecord],
    ) -> AggregatedLogRecord {
        let first = &records[0].record;
        let now = Utc::now();
        let first_timestamp = records.iter().map(BufferedLogRecord::timestamp).min().unwrap_or(now);
        let last_timestamp = records.iter().map(BufferedLogRecord::timestamp).max().unwrap_or(now);

        let mut sample_messages: Vec<String> = Vec::with_capacity(MAX_SAMPLE_MESSAGES);
        for buffered in records {
            if sample_messages.len() == MAX_SAMPLE_MESSAGES {
                break;
            }
            let message = safe_get_message(&buffered.record);
            if !sample_messages.contains(&message) {
                sample_messages.push(message);
            }
        }

        AggregatedLogRecord {
            pattern_id,
            pattern_type,
            template,
            count: records.len(),
            level: first.level,
            logger_name: first.logger_name.clone(),
            first_timestamp,
            last_timestamp,
            sample_messages,
            record_ids: records.iter().map(|buffered| buffered.record.id).collect(),
        }
    }

    fn record_created(&mut self, aggregated: &AggregatedLogRecord) {
        self.total_aggregations_created += 1;
        self.total_records_aggregated += aggregated.count as u64;
    }

    pub fn get_statistics(&self) -> EngineStatistics {
        let created = self.total_aggregations_created as f64;
        EngineStatistics {
            total_patterns_processed: self.total_patterns_processed,
            total_records_aggregated: self.total_records_aggregated,
            total_aggregations_created: self.total_aggregations_created,
            average_records_per_aggregation: if created > 0.0 {
                self.total_records_aggregated as f64 / created
            } else {
                0.0
            },
            aggregation_rate: if self.total_patterns_processed > 0 {
                created / self.total_patterns_processed as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset_statistics(&mut self) {
        self.total_patterns_processed = 0;
        self.total_records_aggregated = 0;
        self.total_aggregations_created = 0;
    }
}

fn listed(items: &[String], separator: &str) -> String {
    let mut text = items
        .iter()
        .take(MAX_LISTED_ITEMS)
        .cloned()
        .collect::<Vec<_>>()
        .join(separator);
    if items.len() > MAX_LISTED_ITEMS {
        text.push_str("...");
    }
    text
}

/// Human readable template for a typed group
pub fn group_template(group: &PatternGroup) -> String {
    match &group.metadata {
        PatternMetadata::PlotLines { line_names } => {
            format!("Adding plot lines: {}", listed(line_names, ", "))
        }
        PatternMetadata::Cascade { components } => {
            format!("Cascade initialization: {}", components.join(" → "))
        }
        PatternMetadata::RequestResponse {
            requests,
            responses,
        } => format!("Request-response cycle: {requests} requests, {responses} responses"),
        PatternMetadata::FileOperations {
            operations,
            extensions,
        } => format!(
            "File operations: {} ({})",
            listed(operations, ", "),
            listed(extensions, ", ")
        ),
        PatternMetadata::GuiUpdates { update_types } => {
            format!("GUI updates: {}", listed(update_types, ", "))
        }
        PatternMetadata::Basic { template } => template.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::patterns::PatternDetector;
    use chrono::Duration;

    fn buffered_at(logger: &str, message: &str, offset_ms: i64) -> BufferedLogRecord {
        let created = Utc::now() + Duration::milliseconds(offset_ms);
        BufferedLogRecord::new(LogRecord::new(LogLevel::Info, logger, message).with_created(created))
    }

    #[test]
    fn test_count_matches_cluster_and_span_is_ordered() {
        let records = vec![
            buffered_at("app", "Processing item 3", 30),
            buffered_at("app", "Processing item 1", 0),
            buffered_at("app", "Processing item 2", 10),
            buffered_at("app", "Processing item 2", 20),
        ];
        let mut detector = PatternDetector::new(0.8, 2);
        let patterns = detector.detect_patterns(&records);
        let mut engine = AggregationEngine::new(2);
        let aggregated = engine.aggregate_patterns(&patterns);

        assert_eq!(aggregated.len(), 1);
        let summary = &aggregated[0];
        assert_eq!(summary.count, 4);
        assert!(summary.first_timestamp <= summary.last_timestamp);
        assert_eq!(summary.first_timestamp, records[1].timestamp());
        assert_eq!(summary.sample_messages.len(), 3);
        assert_eq!(summary.record_ids.len(), 4);
    }

    #[test]
    fn test_samples_are_deduplicated() {
        let records = vec![
            buffered_at("app", "Retrying", 0),
            buffered_at("app", "Retrying", 1),
            buffered_at("app", "Retrying", 2),
        ];
        let mut detector = PatternDetector::new(0.8, 2);
        let mut engine = AggregationEngine::new(2);
        let aggregated = engine.aggregate_patterns(&detector.detect_patterns(&records));
        assert_eq!(aggregated[0].sample_messages, vec!["Retrying".to_string()]);
    }

    #[test]
    fn test_plot_line_template_truncates() {
        let records: Vec<_> = ["F1/3", "F2", "F3", "F4"]
            .iter()
            .enumerate()
            .map(|(i, name)| buffered_at("app.gui.plot", &format!("Adding line: {name}"), i as i64))
            .collect();
        let mut detector = PatternDetector::new(0.8, 2);
        let groups = detector.detect_pattern_groups(&records);
        let mut engine = AggregationEngine::new(2);
        let aggregated = engine.aggregate_pattern_groups(&groups);
        assert_eq!(aggregated[0].template, "Adding plot lines: F1/3, F2, F3...");
        assert_eq!(aggregated[0].count, 4);
    }

    #[test]
    fn test_groups_below_engine_minimum_are_skipped() {
        let records = vec![
            buffered_at("app", "Tick 1", 0),
            buffered_at("app", "Tick 2", 1),
            buffered_at("app", "Tick 3", 2),
        ];
        let mut detector = PatternDetector::new(0.5, 2);
        let patterns = detector.detect_patterns(&records);
        let groups = detector.detect_pattern_groups(&records);

        let mut engine = AggregationEngine::new(4);
        assert!(engine.aggregate_patterns(&patterns).is_empty());
        assert!(engine.aggregate_pattern_groups(&groups).is_empty());
        assert_eq!(engine.get_statistics().total_aggregations_created, 0);

        let mut engine = AggregationEngine::new(3);
        assert_eq!(engine.aggregate_patterns(&patterns).len(), 1);
    }

    #[test]
    fn test_statistics_averages() {
        let mut engine = AggregationEngine::new(2);
        let records = vec![buffered_at("app", "Tick 1", 0), buffered_at("app", "Tick 2", 1)];
        let mut detector = PatternDetector::new(0.5, 2);
        engine.aggregate_patterns(&detector.detect_patterns(&records));

        let stats = engine.get_statistics();
        assert_eq!(stats.total_aggregations_created, 1);
        assert_eq!(stats.total_records_aggregated, 2);
        assert_eq!(stats.average_records_per_aggregation, 2.0);
    }

    #[test]
    fn test_render_contains_template_and_count() {
        let records = vec![buffered_at("app", "Tick 1", 0), buffered_at("app", "Tick 2", 5)];
        let mut detector = PatternDetector::new(0.5, 2);
        let mut engine = AggregationEngine::new(2);
        let aggregated = engine.aggregate_patterns(&detector.detect_patterns(&records));
        let record = aggregated[0].to_log_record();
        assert!(record.msg.starts_with("Tick <NUM> [x2 over"));
        assert!(record.msg.contains("samples: \"Tick 1\", \"Tick 2\""));
        assert_eq!(record.created, aggregated[0].first_timestamp);
    }
}
