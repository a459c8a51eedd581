//! Error expansion: context, classification and suggestions for error records

use super::buffer::BufferedLogRecord;
use crate::record::{safe_get_message, LogLevel, LogRecord};
use chrono::Duration;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

const BANNER_WIDTH: usize = 80;
const RENDERED_CONTEXT_LINES: usize = 5;
const RENDERED_RELATED_LINES: usize = 3;
const RENDERED_TRACE_LINES: usize = 5;

/// Score weights for classification matches
const KEYWORD_WEIGHT: usize = 2;
const CONTEXT_WEIGHT: usize = 1;

lazy_static! {
    static ref FILENAME_PATTERN: Regex = Regex::new(r"\b[\w\-]+\.[a-z][a-z0-9]{1,4}\b").unwrap();
    static ref OPERATION_TYPE_PATTERN: Regex = Regex::new(r"\bOperationType\.\w+").unwrap();
    static ref COMPONENT_PATTERN: Regex =
        Regex::new(r"\b\w+_(?:data|operations|handler|engine|manager)\b").unwrap();
    static ref MODULE_PATTERN: Regex = Regex::new(r"\b\w+\.py\b").unwrap();
    static ref TRACE_LINE_PATTERN: Regex =
        Regex::new(r#"^\s*(?:Traceback|File ".+", line \d+|at .+:\d+)"#).unwrap();
}

const FILE_NOT_FOUND_PHRASES: &[&str] = &[
    "file not found",
    "no such file",
    "cannot open",
    "could not open",
    "filenotfounderror",
];

/// Category of a captured application error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    FileNotFound,
    MemoryError,
    GuiError,
    CalculationError,
    OperationError,
    DataError,
}

impl ErrorClassification {
    /// Scored categories in tie-breaking priority order
    const SCORED: [ErrorClassification; 5] = [
        ErrorClassification::MemoryError,
        ErrorClassification::GuiError,
        ErrorClassification::CalculationError,
        ErrorClassification::OperationError,
        ErrorClassification::DataError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClassification::FileNotFound => "file_not_found",
            ErrorClassification::MemoryError => "memory_error",
            ErrorClassification::GuiError => "gui_error",
            ErrorClassification::CalculationError => "calculation_error",
            ErrorClassification::OperationError => "operation_error",
            ErrorClassification::DataError => "data_error",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ErrorClassification::FileNotFound => "File Not Found",
            ErrorClassification::MemoryError => "Memory Error",
            ErrorClassification::GuiError => "GUI Error",
            ErrorClassification::CalculationError => "Calculation Error",
            ErrorClassification::OperationError => "Operation Error",
            ErrorClassification::DataError => "Data Error",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            ErrorClassification::FileNotFound => FILE_NOT_FOUND_PHRASES,
            ErrorClassification::MemoryError => {
                &["memory", "out of memory", "allocation", "memoryerror", "heap", "oom"]
            }
            ErrorClassification::GuiError => &[
                "gui", "widget", "window", "button", "plot", "canvas", "render", "display", "signal",
                "slot",
            ],
            ErrorClassification::CalculationError => &[
                "calculation",
                "compute",
                "matrix",
                "optimization",
                "convergence",
                "nan",
                "infinity",
                "overflow",
                "division by zero",
                "numerical",
                "singular",
            ],
            ErrorClassification::OperationError => &[
                "operation",
                "operationtype",
                "request",
                "handler",
                "dispatch",
                "timeout",
            ],
            ErrorClassification::DataError => &[
                "data",
                "dataframe",
                "column",
                "parse",
                "invalid value",
                "keyerror",
                "index",
                "shape",
                "missing",
            ],
        }
    }

    fn suggestions(self) -> &'static [&'static str] {
        match self {
            ErrorClassification::FileNotFound => &[
                "Verify the file path exists and is spelled correctly",
                "Check file permissions for the current user",
                "Use an absolute path or confirm the working directory",
            ],
            ErrorClassification::MemoryError => &[
                "Reduce the size of the data being processed",
                "Process the data in smaller chunks",
                "Look for unbounded caches or retained references",
            ],
            ErrorClassification::GuiError => &[
                "Make sure GUI updates run on the main thread",
                "Check that the widget still exists before updating it",
                "Verify signal and slot connections",
            ],
            ErrorClassification::CalculationError => &[
                "Check input values for NaN or infinite entries",
                "Verify parameter bounds and initial values",
                "Inspect intermediate results for numerical instability",
            ],
            ErrorClassification::OperationError => &[
                "Check that the operation type has a registered handler",
                "Verify the request parameters",
                "Review the preceding operations for a failed step",
            ],
            ErrorClassification::DataError => &[
                "Validate the input data format and columns",
                "Check for missing or malformed values",
                "Confirm the data was loaded before it is used",
            ],
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything gathered for one error record
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub error_record: LogRecord,
    /// Message to display; the uncompressed original when one was cached
    pub message: String,
    /// Most recent first
    pub preceding_context: Vec<BufferedLogRecord>,
    pub related_operations: Vec<BufferedLogRecord>,
    pub error_trace: Vec<String>,
    pub suggested_actions: Vec<String>,
    pub error_classification: Option<ErrorClassification>,
    pub context_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorExpansionStatistics {
    pub enabled: bool,
    pub threshold_level: String,
    pub errors_analyzed: u64,
    pub contexts_generated: u64,
    pub suggestions_created: u64,
    pub classifications_made: u64,
    pub classifications: BTreeMap<String, u64>,
}

/// Builds and renders [`ErrorContext`]s
#[derive(Debug)]
pub struct ErrorExpansionEngine {
    enabled: AtomicBool,
    threshold_level: LogLevel,
    context_lines: usize,
    trace_depth: usize,
    context_time_window: Duration,
    errors_analyzed: AtomicU64,
    contexts_generated: AtomicU64,
    suggestions_created: AtomicU64,
    classifications_made: AtomicU64,
    classifications: Mutex<BTreeMap<ErrorClassification, u64>>,
}

impl ErrorExpansionEngine {
    pub fn new(
        threshold_level: LogLevel,
        context_lines: usize,
        trace_depth: usize,
        context_time_window_secs: f64,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            threshold_level,
            context_lines,
            trace_depth,
            context_time_window: Duration::milliseconds((context_time_window_secs * 1000.0) as i64),
            errors_analyzed: AtomicU64::new(0),
            contexts_generated: AtomicU64::new(0),
            suggestions_created: AtomicU64::new(0),
            classifications_made: AtomicU64::new(0),
            classifications: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &crate::config::AggregationConfig) -> Self {
        let engine = Self::new(
            config.error_threshold_level,
            config.error_context_lines,
            config.error_trace_depth,
            config.error_context_time_window,
        );
        engine.set_enabled(config.error_expansion_enabled);
        engine
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn is_error_record(&self, record: &LogRecord) -> bool {
        self.is_enabled() && record.level >= self.threshold_level
    }

    /// Gather context around `record` from the rolling `recent` records
    pub fn expand_error(
        &self,
        record: &LogRecord,
        recent: &[BufferedLogRecord],
        full_message: Option<String>,
    ) -> ErrorContext {
        let message = full_message.unwrap_or_else(|| safe_get_message(record));
        let preceding_context = self.find_preceding_context(record, recent);
        let related_operations = self.find_related_operations(record, &message, recent);

        let mut context_keywords = extract_keywords(&message);
        for buffered in &preceding_context {
            for keyword in extract_keywords(&safe_get_message(&buffered.record)) {
                if !context_keywords.contains(&keyword) {
                    context_keywords.push(keyword);
                }
            }
        }

        let error_classification = classify_error(&message, &context_keywords);
        let suggested_actions = suggest_actions(record, error_classification, &context_keywords);
        let error_trace = self.extract_trace(record, &message);

        self.errors_analyzed.fetch_add(1, Ordering::Relaxed);
        if !preceding_context.is_empty() {
            self.contexts_generated.fetch_add(1, Ordering::Relaxed);
        }
        if !suggested_actions.is_empty() {
            self.suggestions_created.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(classification) = error_classification {
            self.classifications_made.fetch_add(1, Ordering::Relaxed);
            *self
                .classifications
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(classification)
                .or_insert(0) += 1;
        }

        ErrorContext {
            error_record: record.clone(),
            message,
            preceding_context,
            related_operations,
            error_trace,
            suggested_actions,
            error_classification,
            context_keywords,
        }
    }

    /// Expand and render in one step
    pub fn expand(&self, record: &LogRecord, recent: &[BufferedLogRecord], full_message: Option<String>) -> String {
        let context = self.expand_error(record, recent, full_message);
        format_expanded_error(&context)
    }

    fn find_preceding_context(&self, record: &LogRecord, recent: &[BufferedLogRecord]) -> Vec<BufferedLogRecord> {
        let earliest = record.created - self.context_time_window;
        recent
            .iter()
            .rev()
            .filter(|buffered| buffered.record.id != record.id)
            .filter(|buffered| {
                let created = buffered.record.created;
                created <= record.created && created >= earliest
            })
            .take(self.context_lines)
            .cloned()
            .collect()
    }

    fn find_related_operations(
        &self,
        record: &LogRecord,
        message: &str,
        recent: &[BufferedLogRecord],
    ) -> Vec<BufferedLogRecord> {
        let keywords = extract_keywords(message);
        if keywords.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &BufferedLogRecord)> = recent
            .iter()
            .rev()
            .filter(|buffered| buffered.record.id != record.id)
            .filter_map(|buffered| {
                let candidate = extract_keywords(&safe_get_message(&buffered.record));
                let overlap = keywords.iter().filter(|keyword| candidate.contains(keyword)).count();
                (overlap > 0).then_some((overlap, buffered))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(self.trace_depth)
            .map(|(_, buffered)| buffered.clone())
            .collect()
    }

    fn extract_trace(&self, record: &LogRecord, message: &str) -> Vec<String> {
        let mut trace: Vec<String> = match &record.exc_info {
            Some(exc) => {
                let mut lines = exc.traceback.clone();
                lines.push(format!("{}: {}", exc.type_name, exc.message));
                lines
            }
            None => message
                .lines()
                .filter(|line| TRACE_LINE_PATTERN.is_match(line))
                .map(|line| line.trim().to_string())
                .collect(),
        };
        if trace.len() > self.trace_depth {
            trace.drain(..trace.len() - self.trace_depth);
        }
        trace
    }

    pub fn get_statistics(&self) -> ErrorExpansionStatistics {
        let classifications = self
            .classifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(classification, count)| (classification.as_str().to_string(), *count))
            .collect();
        ErrorExpansionStatistics {
            enabled: self.is_enabled(),
            threshold_level: self.threshold_level.to_string(),
            errors_analyzed: self.errors_analyzed.load(Ordering::Relaxed),
            contexts_generated: self.contexts_generated.load(Ordering::Relaxed),
            suggestions_created: self.suggestions_created.load(Ordering::Relaxed),
            classifications_made: self.classifications_made.load(Ordering::Relaxed),
            classifications,
        }
    }
}

/// True when `term` occurs in `haystack` delimited by non-word characters
fn contains_term(haystack: &str, term: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(term).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Filenames, `OperationType.*` tokens, component identifiers and module names
pub fn extract_keywords(message: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for pattern in [
        &*OPERATION_TYPE_PATTERN,
        &*FILENAME_PATTERN,
        &*COMPONENT_PATTERN,
        &*MODULE_PATTERN,
    ] {
        for found in pattern.find_iter(message) {
            let keyword = found.as_str().to_string();
            if !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }
    keywords
}

/// Priority-ordered keyword classification
pub fn classify_error(message: &str, context_keywords: &[String]) -> Option<ErrorClassification> {
    let lower = message.to_lowercase();
    if FILE_NOT_FOUND_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return Some(ErrorClassification::FileNotFound);
    }

    let context: Vec<String> = context_keywords.iter().map(|k| k.to_lowercase()).collect();
    let mut best: Option<(ErrorClassification, usize)> = None;
    for classification in ErrorClassification::SCORED {
        let score: usize = classification
            .keywords()
            .iter()
            .map(|keyword| {
                let mut points = 0;
                if contains_term(&lower, keyword) {
                    points += KEYWORD_WEIGHT;
                }
                if context.iter().any(|k| k.contains(keyword)) {
                    points += CONTEXT_WEIGHT;
                }
                points
            })
            .sum();
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((classification, score));
        }
    }
    best.map(|(classification, _)| classification)
}

fn suggest_actions(
    record: &LogRecord,
    classification: Option<ErrorClassification>,
    context_keywords: &[String],
) -> Vec<String> {
    let mut suggestions: Vec<String> = classification
        .map(|c| c.suggestions().iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();

    let files: Vec<&str> = context_keywords
        .iter()
        .filter(|keyword| FILENAME_PATTERN.is_match(keyword) && !keyword.starts_with("OperationType"))
        .map(String::as_str)
        .collect();
    if !files.is_empty() && classification != Some(ErrorClassification::FileNotFound) {
        suggestions.push(format!("Confirm the referenced files are accessible: {}", files.join(", ")));
    }
    let gui_context = context_keywords.iter().any(|keyword| {
        let lower = keyword.to_lowercase();
        ["gui", "widget", "plot", "window"].iter().any(|term| lower.contains(term))
    });
    if gui_context && classification != Some(ErrorClassification::GuiError) {
        suggestions.push("Review the GUI interactions that preceded the error".to_string());
    }
    if let (Some(path), Some(line)) = (&record.pathname, record.lineno) {
        suggestions.push(format!("Check code in file {path}:{line}"));
    }
    suggestions
}

/// Multi-line report for an expanded error
pub fn format_expanded_error(context: &ErrorContext) -> String {
    let record = &context.error_record;
    let rule = "=".repeat(BANNER_WIDTH);
    let mut lines = vec![
        rule.clone(),
        "🚨 DETAILED ERROR ANALYSIS".to_string(),
        rule.clone(),
    ];

    match (&record.pathname, record.lineno) {
        (Some(path), Some(line)) => lines.push(format!("Location: {path}:{line} ({})", record.logger_name)),
        _ => lines.push(format!("Location: {}", record.logger_name)),
    }
    lines.push(format!("Time: {}", record.created.format("%Y-%m-%d %H:%M:%S%.3f")));
    lines.push(format!("Level: {}", record.level));
    lines.push(format!("Message: {}", context.message));
    if let Some(classification) = context.error_classification {
        lines.push(format!(
            "Classification: {} ({})",
            classification.as_str(),
            classification.title()
        ));
    }

    if !context.preceding_context.is_empty() {
        lines.push(String::new());
        lines.push("📋 Preceding context (most recent first):".to_string());
        for buffered in context.preceding_context.iter().take(RENDERED_CONTEXT_LINES) {
            let ago = (record.created - buffered.record.created)
                .num_milliseconds()
                .max(0) as f64
                / 1000.0;
            lines.push(format!(
                "  [{ago:.1}s ago] {} {}: {}",
                buffered.record.level,
                buffered.record.logger_name,
                safe_get_message(&buffered.record)
            ));
        }
    }

    if !context.related_operations.is_empty() {
        lines.push(String::new());
        lines.push("🔗 Related operations:".to_string());
        for buffered in context.related_operations.iter().take(RENDERED_RELATED_LINES) {
            lines.push(format!(
                "  - {} {}: {}",
                buffered.record.level,
                buffered.record.logger_name,
                safe_get_message(&buffered.record)
            ));
        }
    }

    if !context.error_trace.is_empty() {
        lines.push(String::new());
        lines.push("🔍 Error trace:".to_string());
        let skip = context.error_trace.len().saturating_sub(RENDERED_TRACE_LINES);
        for line in context.error_trace.iter().skip(skip) {
            lines.push(format!("  {line}"));
        }
    }

    if !context.suggested_actions.is_empty() {
        lines.push(String::new());
        lines.push("💡 Suggested actions:".to_string());
        for (index, suggestion) in context.suggested_actions.iter().enumerate() {
            lines.push(format!("  {}. {}", index + 1, suggestion));
        }
    }

    lines.push(rule);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExceptionInfo;
    use chrono::Utc;

    fn engine(threshold: LogLevel) -> ErrorExpansionEngine {
        ErrorExpansionEngine::new(threshold, 5, 10, 10.0)
    }

    fn buffered(level: LogLevel, message: &str, seconds_ago: i64) -> BufferedLogRecord {
        let created = Utc::now() - Duration::seconds(seconds_ago);
        BufferedLogRecord::new(LogRecord::new(level, "app.core", message).with_created(created))
    }

    #[test]
    fn test_threshold_gating() {
        let engine = engine(LogLevel::Error);
        assert!(!engine.is_error_record(&LogRecord::new(LogLevel::Warning, "app", "careful")));
        assert!(engine.is_error_record(&LogRecord::new(LogLevel::Error, "app", "broken")));

        engine.set_enabled(false);
        assert!(!engine.is_error_record(&LogRecord::new(LogLevel::Critical, "app", "broken")));
    }

    #[test]
    fn test_classification_priority() {
        assert_eq!(
            classify_error("File not found: data.csv cannot be opened", &[]),
            Some(ErrorClassification::FileNotFound)
        );
        assert_eq!(
            classify_error("Memory allocation failed during matrix calculation", &[]),
            Some(ErrorClassification::MemoryError)
        );
        assert_eq!(classify_error("This is just a normal message", &[]), None);
        assert_eq!(
            classify_error("Widget failed to redraw", &[]),
            Some(ErrorClassification::GuiError)
        );
    }

    #[test]
    fn test_terms_respect_word_boundaries() {
        assert!(contains_term("value is nan here", "nan"));
        assert!(!contains_term("financial report", "nan"));
        assert!(contains_term("failed (data.csv)", "data"));
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = extract_keywords(
            "OperationType.LOAD_FILE failed in file_data for exp1.csv via loader.py",
        );
        assert!(keywords.contains(&"OperationType.LOAD_FILE".to_string()));
        assert!(keywords.contains(&"exp1.csv".to_string()));
        assert!(keywords.contains(&"file_data".to_string()));
        assert!(keywords.contains(&"loader.py".to_string()));
    }

    #[test]
    fn test_preceding_context_is_windowed_and_most_recent_first() {
        let engine = ErrorExpansionEngine::new(LogLevel::Warning, 2, 10, 10.0);
        let recent = vec![
            buffered(LogLevel::Info, "too old", 60),
            buffered(LogLevel::Info, "first", 3),
            buffered(LogLevel::Info, "second", 2),
            buffered(LogLevel::Info, "third", 1),
        ];
        let error = LogRecord::new(LogLevel::Error, "app.core", "boom");
        let context = engine.expand_error(&error, &recent, None);
        let messages: Vec<&str> = context
            .preceding_context
            .iter()
            .map(|b| b.record.msg.as_str())
            .collect();
        assert_eq!(messages, vec!["third", "second"]);
    }

    #[test]
    fn test_related_operations_ranked_by_overlap() {
        let engine = engine(LogLevel::Warning);
        let recent = vec![
            buffered(LogLevel::Info, "Opened exp1.csv in file_data", 3),
            buffered(LogLevel::Info, "Unrelated message", 2),
            buffered(LogLevel::Info, "Parsed exp1.csv", 1),
        ];
        let error = LogRecord::new(LogLevel::Error, "app.core", "file_data failed on exp1.csv");
        let context = engine.expand_error(&error, &recent, None);
        assert_eq!(context.related_operations.len(), 2);
        assert_eq!(context.related_operations[0].record.msg, "Opened exp1.csv in file_data");
    }

    #[test]
    fn test_rendering_and_statistics() {
        let engine = engine(LogLevel::Warning);
        let recent = vec![buffered(LogLevel::Info, "Loading config", 1)];
        let error = LogRecord::new(LogLevel::Error, "app.io", "File not found: data.csv")
            .with_location("app/io/loader.py", 42)
            .with_exception(
                ExceptionInfo::new("FileNotFoundError", "data.csv")
                    .with_traceback(vec!["File \"loader.py\", line 42, in load".to_string()]),
            );
        let rendered = engine.expand(&error, &recent, None);

        assert!(rendered.contains("DETAILED ERROR ANALYSIS"));
        assert!(rendered.contains("Classification: file_not_found (File Not Found)"));
        assert!(rendered.contains("Location: app/io/loader.py:42"));
        assert!(rendered.contains("Loading config"));
        assert!(rendered.contains("FileNotFoundError: data.csv"));
        assert!(rendered.contains("Check code in file app/io/loader.py:42"));
        assert!(rendered.to_lowercase().contains("path"));

        let stats = engine.get_statistics();
        assert_eq!(stats.errors_analyzed, 1);
        assert_eq!(stats.contexts_generated, 1);
        assert_eq!(stats.suggestions_created, 1);
        assert_eq!(stats.classifications_made, 1);
        assert_eq!(stats.classifications.get("file_not_found"), Some(&1));
    }

    #[test]
    fn test_unclassified_error_omits_sections() {
        let engine = engine(LogLevel::Warning);
        let error = LogRecord::new(LogLevel::Warning, "app", "Something odd");
        let rendered = engine.expand(&error, &[], None);
        assert!(!rendered.contains("Classification:"));
        assert!(!rendered.contains("Suggested actions"));
        assert!(!rendered.contains("Preceding context"));
        assert_eq!(engine.get_statistics().classifications_made, 0);
    }
}
