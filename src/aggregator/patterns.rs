//! Pattern detection over flushed records
//!
//! Records are partitioned by `(level, logger, module)` and greedily clustered
//! by textual similarity. The enhanced mode first recognizes semantic pattern
//! types (plot line additions, initialization cascades, request/response
//! cycles, file operations, GUI updates) and only clusters the remainder.

use super::buffer::BufferedLogRecord;
use crate::record::{safe_get_message, safe_get_message_for_comparison, LogLevel};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

lazy_static! {
    static ref DATE_PATTERN: Regex = Regex::new(
        r"\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)?"
    )
    .unwrap();
    static ref HEX_PATTERN: Regex = Regex::new(r"\b(?:0x[0-9a-fA-F]+|[0-9a-fA-F]{8,})\b").unwrap();
    static ref NUMBER_PATTERN: Regex = Regex::new(r"\d+(?:\.\d+)?").unwrap();

    static ref PLOT_LINE_PATTERN: Regex = Regex::new(
        r#"(?i)\badd(?:ing|ed|s)?\s+(?:plot\s+)?line\b\s*[:=]?\s*['"]?([^'",\s]+)"#
    )
    .unwrap();
    static ref INIT_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:initializ(?:ing|ed|e)|initialis(?:ing|ed|e))\b(?:\s+component)?[:\s]*([A-Za-z_]\w*)?"
    )
    .unwrap();
    static ref REQUEST_RESPONSE_PATTERN: Regex =
        Regex::new(r"(?i)\b(request|response)s?\b").unwrap();
    static ref FILE_OPERATION_PATTERN: Regex = Regex::new(
        r"(?i)\b(load(?:ing|ed|s)?|sav(?:e|ed|es|ing)|read(?:ing|s)?|writ(?:e|es|ing|ten)|open(?:ing|ed|s)?|export(?:ing|ed|s)?|import(?:ing|ed|s)?)\b.*?[\w\-]+\.([A-Za-z][A-Za-z0-9]{1,4})\b"
    )
    .unwrap();
    static ref GUI_UPDATE_PATTERN: Regex = Regex::new(
        r"(?i)\b(updat(?:e|ed|es|ing)|refresh(?:ed|es|ing)?|redraw(?:n|s|ing)?|repaint(?:ed|s|ing)?|render(?:ed|s|ing)?)\b"
    )
    .unwrap();
    static ref GUI_CONTEXT_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:gui|ui|widget|plot|canvas|window|panel|view|tab|button|dialog|sidebar)\b"
    )
    .unwrap();
}

/// Kinds of patterns the enhanced detector recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    PlotLinesAddition,
    CascadeComponentInitialization,
    RequestResponseCycle,
    FileOperations,
    GuiUpdates,
    BasicSimilarity,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::PlotLinesAddition => "plot_lines_addition",
            PatternType::CascadeComponentInitialization => "cascade_component_initialization",
            PatternType::RequestResponseCycle => "request_response_cycle",
            PatternType::FileOperations => "file_operations",
            PatternType::GuiUpdates => "gui_updates",
            PatternType::BasicSimilarity => "basic_similarity",
        }
    }

    /// Semantic types in detection priority order
    pub fn semantic() -> [PatternType; 5] {
        [
            PatternType::PlotLinesAddition,
            PatternType::CascadeComponentInitialization,
            PatternType::RequestResponseCycle,
            PatternType::FileOperations,
            PatternType::GuiUpdates,
        ]
    }
}

/// Typed metadata attached to a pattern group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternMetadata {
    PlotLines { line_names: Vec<String> },
    Cascade { components: Vec<String> },
    RequestResponse { requests: usize, responses: usize },
    FileOperations { operations: Vec<String>, extensions: Vec<String> },
    GuiUpdates { update_types: Vec<String> },
    Basic { template: String },
}

/// Similarity cluster produced by [`PatternDetector::detect_patterns`]
#[derive(Debug, Clone)]
pub struct LogPattern {
    pub pattern_id: String,
    pub template: String,
    pub records: Vec<BufferedLogRecord>,
    pub count: usize,
    pub level: LogLevel,
    pub logger_name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Typed group produced by [`PatternDetector::detect_pattern_groups`]
#[derive(Debug, Clone)]
pub struct PatternGroup {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub records: Vec<BufferedLogRecord>,
    pub count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metadata: PatternMetadata,
}

impl PatternGroup {
    /// Record ids of the members, used to locate the group in the flushed batch
    pub fn record_ids(&self) -> Vec<u64> {
        self.records.iter().map(|buffered| buffered.record.id).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectorStatistics {
    pub detection_runs: u64,
    pub records_analyzed: u64,
    pub patterns_detected: u64,
    pub groups_by_type: BTreeMap<String, u64>,
}

/// Semantic detail extracted from one record
#[derive(Debug, Clone)]
enum Semantic {
    PlotLine(String),
    Component(String),
    Request,
    Response,
    FileOperation { verb: String, extension: String },
    GuiUpdate(String),
}

impl Semantic {
    fn pattern_type(&self) -> PatternType {
        match self {
            Semantic::PlotLine(_) => PatternType::PlotLinesAddition,
            Semantic::Component(_) => PatternType::CascadeComponentInitialization,
            Semantic::Request | Semantic::Response => PatternType::RequestResponseCycle,
            Semantic::FileOperation { .. } => PatternType::FileOperations,
            Semantic::GuiUpdate(_) => PatternType::GuiUpdates,
        }
    }
}

/// Groups records into patterns by similarity and semantic type
#[derive(Debug)]
pub struct PatternDetector {
    similarity_threshold: f64,
    min_cluster_size: usize,
    stats: DetectorStatistics,
}

impl PatternDetector {
    pub fn new(similarity_threshold: f64, min_cluster_size: usize) -> Self {
        Self {
            similarity_threshold,
            min_cluster_size: min_cluster_size.max(2),
            stats: DetectorStatistics::default(),
        }
    }

    pub fn set_similarity_threshold(&mut self, threshold: f64) {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
    }

    /// Similarity clusters of at least `min_cluster_size` records
    pub fn detect_patterns(&mut self, records: &[BufferedLogRecord]) -> Vec<LogPattern> {
        self.stats.detection_runs += 1;
        self.stats.records_analyzed += records.len() as u64;

        let indices: Vec<usize> = (0..records.len()).collect();
        let patterns: Vec<LogPattern> = self
            .similarity_clusters(records, &indices)
            .into_iter()
            .map(|cluster| build_pattern(records, &cluster))
            .collect();

        self.stats.patterns_detected += patterns.len() as u64;
        *self
            .stats
            .groups_by_type
            .entry(PatternType::BasicSimilarity.as_str().to_string())
            .or_insert(0) += patterns.len() as u64;
        patterns
    }

    /// Semantic groups first, similarity clusters for whatever is left
    pub fn detect_pattern_groups(&mut self, records: &[BufferedLogRecord]) -> Vec<PatternGroup> {
        self.stats.detection_runs += 1;
        self.stats.records_analyzed += records.len() as u64;

        let mut buckets: Vec<((PatternType, LogLevel), Vec<(usize, Semantic)>)> = Vec::new();
        let mut unmatched = Vec::new();

        for (index, buffered) in records.iter().enumerate() {
            match classify_semantic(buffered) {
                Some(semantic) => {
                    let key = (semantic.pattern_type(), buffered.record.level);
                    match buckets.iter_mut().find(|(existing, _)| *existing == key) {
                        Some((_, members)) => members.push((index, semantic)),
                        None => buckets.push((key, vec![(index, semantic)])),
                    }
                }
                None => unmatched.push(index),
            }
        }

        let mut groups: Vec<(usize, PatternGroup)> = Vec::new();
        for ((pattern_type, _), members) in buckets {
            if members.len() < self.min_cluster_size {
                unmatched.extend(members.iter().map(|(index, _)| *index));
                continue;
            }
            let first_index = members[0].0;
            groups.push((first_index, build_semantic_group(records, pattern_type, &members)));
        }

        unmatched.sort_unstable();
        for cluster in self.similarity_clusters(records, &unmatched) {
            let pattern = build_pattern(records, &cluster);
            groups.push((
                cluster[0],
                PatternGroup {
                    pattern_id: pattern.pattern_id,
                    pattern_type: PatternType::BasicSimilarity,
                    count: pattern.count,
                    start_time: pattern.first_seen,
                    end_time: pattern.last_seen,
                    metadata: PatternMetadata::Basic {
                        template: pattern.template,
                    },
                    records: pattern.records,
                },
            ));
        }

        groups.sort_by_key(|(first_index, _)| *first_index);
        self.stats.patterns_detected += groups.len() as u64;
        for (_, group) in &groups {
            *self
                .stats
                .groups_by_type
                .entry(group.pattern_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        groups.into_iter().map(|(_, group)| group).collect()
    }

    /// Greedy clustering within homogeneous `(level, logger, module)` partitions
    fn similarity_clusters(&self, records: &[BufferedLogRecord], indices: &[usize]) -> Vec<Vec<usize>> {
        let mut partitions: Vec<((LogLevel, &str, &str), Vec<usize>)> = Vec::new();
        for &index in indices {
            let record = &records[index].record;
            let key = (record.level, record.logger_name.as_str(), record.module.as_str());
            match partitions.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(index),
                None => partitions.push((key, vec![index])),
            }
        }

        let mut clusters = Vec::new();
        for (_, members) in partitions {
            if members.len() < self.min_cluster_size {
                continue;
            }
            let texts: HashMap<usize, String> = members
                .iter()
                .map(|&index| (index, safe_get_message_for_comparison(&records[index].record)))
                .collect();

            let mut remaining = members;
            while let Some((&seed, rest)) = remaining.split_first() {
                let (similar, dissimilar): (Vec<usize>, Vec<usize>) = rest
                    .iter()
                    .partition(|&&other| self.is_similar(&texts[&seed], &texts[&other]));

                if similar.len() + 1 >= self.min_cluster_size {
                    let mut cluster = Vec::with_capacity(similar.len() + 1);
                    cluster.push(seed);
                    cluster.extend(similar);
                    clusters.push(cluster);
                }
                remaining = dissimilar;
            }
        }
        clusters.sort_by_key(|cluster| cluster[0]);
        clusters
    }

    fn is_similar(&self, a: &str, b: &str) -> bool {
        // Upper bound: every character of the shorter string matches
        let (len_a, len_b) = (a.chars().count(), b.chars().count());
        if len_a + len_b > 0 {
            let bound = 2.0 * len_a.min(len_b) as f64 / (len_a + len_b) as f64;
            if bound < self.similarity_threshold {
                return false;
            }
        }
        similarity_ratio(a, b) >= self.similarity_threshold
    }

    pub fn statistics(&self) -> DetectorStatistics {
        self.stats.clone()
    }

    pub fn reset_statistics(&mut self) {
        self.stats = DetectorStatistics::default();
    }
}

/// Sequence-matcher ratio `2 * matches / total_length` in `0.0..=1.0`
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    TextDiff::from_chars(a, b).ratio() as f64
}

/// Replace variable parts of a message with placeholders
pub fn generate_template(message: &str) -> String {
    let templated = DATE_PATTERN.replace_all(message, "<DATE>");
    let templated = HEX_PATTERN.replace_all(&templated, |caps: &regex::Captures| {
        let token = &caps[0];
        let is_hex = token.starts_with("0x") || token.chars().any(|c| c.is_ascii_alphabetic());
        if is_hex {
            "<HEX>".to_string()
        } else {
            token.to_string()
        }
    });
    NUMBER_PATTERN.replace_all(&templated, "<NUM>").into_owned()
}

fn pattern_id(prefix: &str, level: LogLevel, logger_name: &str, template: &str) -> String {
    let mut hasher = DefaultHasher::new();
    level.hash(&mut hasher);
    logger_name.hash(&mut hasher);
    template.hash(&mut hasher);
    format!("{prefix}_{:016x}", hasher.finish())
}

fn time_span(records: &[BufferedLogRecord]) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = records.iter().map(BufferedLogRecord::timestamp).min();
    let last = records.iter().map(BufferedLogRecord::timestamp).max();
    let now = Utc::now();
    (first.unwrap_or(now), last.unwrap_or(now))
}

fn build_pattern(records: &[BufferedLogRecord], cluster: &[usize]) -> LogPattern {
    let members: Vec<BufferedLogRecord> = cluster.iter().map(|&i| records[i].clone()).collect();
    let first = &members[0].record;
    let template = generate_template(&safe_get_message(first));
    let (first_seen, last_seen) = time_span(&members);

    LogPattern {
        pattern_id: pattern_id("pattern", first.level, &first.logger_name, &template),
        template,
        count: members.len(),
        level: first.level,
        logger_name: first.logger_name.clone(),
        first_seen,
        last_seen,
        records: members,
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}

fn build_semantic_group(
    records: &[BufferedLogRecord],
    pattern_type: PatternType,
    members: &[(usize, Semantic)],
) -> PatternGroup {
    let group_records: Vec<BufferedLogRecord> =
        members.iter().map(|(index, _)| records[*index].clone()).collect();

    let metadata = match pattern_type {
        PatternType::PlotLinesAddition => PatternMetadata::PlotLines {
            line_names: members
                .iter()
                .filter_map(|(_, semantic)| match semantic {
                    Semantic::PlotLine(name) => Some(name.clone()),
                    _ => None,
                })
                .collect(),
        },
        PatternType::CascadeComponentInitialization => {
            let mut components = Vec::new();
            for (_, semantic) in members {
                if let Semantic::Component(name) = semantic {
                    push_unique(&mut components, name);
                }
            }
            PatternMetadata::Cascade { components }
        }
        PatternType::RequestResponseCycle => PatternMetadata::RequestResponse {
            requests: members
                .iter()
                .filter(|(_, semantic)| matches!(semantic, Semantic::Request))
                .count(),
            responses: members
                .iter()
                .filter(|(_, semantic)| matches!(semantic, Semantic::Response))
                .count(),
        },
        PatternType::FileOperations => {
            let mut operations = Vec::new();
            let mut extensions = Vec::new();
            for (_, semantic) in members {
                if let Semantic::FileOperation { verb, extension } = semantic {
                    push_unique(&mut operations, verb);
                    push_unique(&mut extensions, extension);
                }
            }
            PatternMetadata::FileOperations {
                operations,
                extensions,
            }
        }
        PatternType::GuiUpdates => {
            let mut update_types = Vec::new();
            for (_, semantic) in members {
                if let Semantic::GuiUpdate(verb) = semantic {
                    push_unique(&mut update_types, verb);
                }
            }
            PatternMetadata::GuiUpdates { update_types }
        }
        PatternType::BasicSimilarity => PatternMetadata::Basic {
            template: generate_template(&safe_get_message(&group_records[0].record)),
        },
    };

    let (start_time, end_time) = time_span(&group_records);
    let first = &group_records[0].record;
    PatternGroup {
        pattern_id: pattern_id(pattern_type.as_str(), first.level, &first.logger_name, pattern_type.as_str()),
        pattern_type,
        count: group_records.len(),
        start_time,
        end_time,
        metadata,
        records: group_records,
    }
}

fn base_verb(word: &str) -> String {
    let lower = word.to_lowercase();
    let base = [
        ("load", "load"),
        ("sav", "save"),
        ("read", "read"),
        ("writ", "write"),
        ("open", "open"),
        ("export", "export"),
        ("import", "import"),
        ("updat", "update"),
        ("refresh", "refresh"),
        ("redraw", "redraw"),
        ("repaint", "repaint"),
        ("render", "render"),
    ]
    .iter()
    .find(|(prefix, _)| lower.starts_with(prefix))
    .map(|(_, base)| *base);
    base.map_or(lower, str::to_string)
}

fn classify_semantic(buffered: &BufferedLogRecord) -> Option<Semantic> {
    let record = &buffered.record;
    let message = safe_get_message(record);

    if let Some(caps) = PLOT_LINE_PATTERN.captures(&message) {
        return Some(Semantic::PlotLine(caps[1].to_string()));
    }

    if record.logger_name.contains('.') {
        if let Some(caps) = INIT_PATTERN.captures(&message) {
            let component = caps
                .get(1)
                .map(|m| m.as_str())
                .filter(|name| name.chars().next().is_some_and(|c| c.is_uppercase()))
                .unwrap_or(record.module.as_str());
            return Some(Semantic::Component(component.to_string()));
        }
    }

    if let Some(caps) = REQUEST_RESPONSE_PATTERN.captures(&message) {
        return Some(if caps[1].eq_ignore_ascii_case("response") {
            Semantic::Response
        } else {
            Semantic::Request
        });
    }

    if let Some(caps) = FILE_OPERATION_PATTERN.captures(&message) {
        return Some(Semantic::FileOperation {
            verb: base_verb(&caps[1]),
            extension: caps[2].to_lowercase(),
        });
    }

    if let Some(caps) = GUI_UPDATE_PATTERN.captures(&message) {
        let gui_context = GUI_CONTEXT_PATTERN.is_match(&message)
            || GUI_CONTEXT_PATTERN.is_match(&record.logger_name.replace(['.', '_'], " "));
        if gui_context {
            return Some(Semantic::GuiUpdate(base_verb(&caps[1])));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogRecord;

    fn buffered(logger: &str, message: &str) -> BufferedLogRecord {
        BufferedLogRecord::new(LogRecord::new(LogLevel::Info, logger, message))
    }

    #[test]
    fn test_single_record_never_forms_pattern() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records = vec![buffered("app", "Processing item 1")];
        assert!(detector.detect_patterns(&records).is_empty());
        assert!(detector.detect_pattern_groups(&records).is_empty());
    }

    #[test]
    fn test_similar_records_form_one_pattern() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records: Vec<_> = (1..=4)
            .map(|i| buffered("app", &format!("Processing item {i} of 10")))
            .collect();
        let patterns = detector.detect_patterns(&records);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].count, 4);
        assert_eq!(patterns[0].template, "Processing item <NUM> of <NUM>");
        assert!(patterns[0].first_seen <= patterns[0].last_seen);
    }

    #[test]
    fn test_different_loggers_do_not_mix() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records = vec![
            buffered("app.a", "Processing item 1"),
            buffered("app.b", "Processing item 2"),
        ];
        assert!(detector.detect_patterns(&records).is_empty());
    }

    #[test]
    fn test_dissimilar_records_are_separate() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records = vec![
            buffered("app", "Processing item 1"),
            buffered("app", "Database connection refused by remote host"),
            buffered("app", "Processing item 2"),
        ];
        let patterns = detector.detect_patterns(&records);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].count, 2);
    }

    #[test]
    fn test_template_generation() {
        assert_eq!(
            generate_template("At 2024-01-15T10:30:00 wrote 42 bytes to 0xdeadbeef"),
            "At <DATE> wrote <NUM> bytes to <HEX>"
        );
        assert_eq!(generate_template("took 12345678 ms"), "took <NUM> ms");
    }

    #[test]
    fn test_plot_line_group() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records = vec![
            buffered("app.gui.plot_canvas", "Adding line: F1/3"),
            buffered("app.gui.plot_canvas", "Adding line: F2"),
            buffered("app.gui.plot_canvas", "Adding line: F3"),
        ];
        let groups = detector.detect_pattern_groups(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern_type, PatternType::PlotLinesAddition);
        assert_eq!(
            groups[0].metadata,
            PatternMetadata::PlotLines {
                line_names: vec!["F1/3".into(), "F2".into(), "F3".into()]
            }
        );
    }

    #[test]
    fn test_cascade_requires_module_qualified_logger() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records = vec![
            buffered("app.core.main_window", "Initialized MainWindow"),
            buffered("app.gui.sidebar", "Initialized Sidebar"),
            buffered("app.gui.console", "Initialized ConsolePanel"),
        ];
        let groups = detector.detect_pattern_groups(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].metadata,
            PatternMetadata::Cascade {
                components: vec!["MainWindow".into(), "Sidebar".into(), "ConsolePanel".into()]
            }
        );

        let unqualified = vec![
            buffered("main", "Initialized MainWindow"),
            buffered("main", "Initialized Sidebar"),
        ];
        let groups = detector.detect_pattern_groups(&unqualified);
        assert!(groups
            .iter()
            .all(|group| group.pattern_type != PatternType::CascadeComponentInitialization));
    }

    #[test]
    fn test_request_response_and_file_operations() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records = vec![
            buffered("app.dispatch", "Sending request to calculations"),
            buffered("app.dispatch", "Got response from calculations"),
            buffered("app.dispatch", "Sending request to file_data"),
            buffered("app.io", "Loading experiment.csv"),
            buffered("app.io", "Saved results.json"),
        ];
        let groups = detector.detect_pattern_groups(&records);
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[0].metadata,
            PatternMetadata::RequestResponse {
                requests: 2,
                responses: 1
            }
        );
        assert_eq!(
            groups[1].metadata,
            PatternMetadata::FileOperations {
                operations: vec!["load".into(), "save".into()],
                extensions: vec!["csv".into(), "json".into()],
            }
        );
    }

    #[test]
    fn test_small_semantic_bucket_falls_back_to_similarity() {
        let mut detector = PatternDetector::new(0.8, 2);
        let records = vec![
            buffered("app", "Adding line: F1"),
            buffered("app", "Step 1 finished"),
            buffered("app", "Step 2 finished"),
        ];
        let groups = detector.detect_pattern_groups(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].pattern_type, PatternType::BasicSimilarity);
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn test_similarity_ratio_bounds() {
        assert_eq!(similarity_ratio("abc", "abc"), 1.0);
        assert_eq!(similarity_ratio("", "abc"), 0.0);
        let ratio = similarity_ratio("Processing item 1", "Processing item 2");
        assert!(ratio > 0.9 && ratio < 1.0);
    }
}
