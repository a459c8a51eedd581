//! Fixed-width ASCII tables for recognized pattern groups

use super::buffer::BufferedLogRecord;
use super::patterns::{PatternGroup, PatternMetadata, PatternType};
use crate::error::{AggregatorError, Result};
use crate::logging::formatters::utils::format_duration;
use crate::record::{safe_get_message, LogLevel, LogRecord};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Columns never shrink below this many characters
pub const MIN_COLUMN_WIDTH: usize = 8;

const ELLIPSIS: char = '…';

lazy_static! {
    static ref FILE_NAME_PATTERN: Regex = Regex::new(r"[\w\-/\\]+\.[A-Za-z][A-Za-z0-9]{1,4}\b").unwrap();
}

/// Headers, rows and a one-line summary for one table
#[derive(Debug, Clone)]
pub struct TableData {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableStatistics {
    pub tables_created: u64,
    pub rows_rendered: u64,
    pub formatting_errors: u64,
    pub tables_by_type: BTreeMap<String, u64>,
}

/// Renders pattern groups as tables
#[derive(Debug)]
pub struct TabularFormatter {
    max_table_width: usize,
    max_rows_per_table: usize,
    auto_format_patterns: Vec<PatternType>,
    stats: TableStatistics,
}

impl TabularFormatter {
    pub fn new(max_table_width: usize, max_rows_per_table: usize, auto_format_patterns: Vec<PatternType>) -> Self {
        Self {
            max_table_width,
            max_rows_per_table: max_rows_per_table.max(1),
            auto_format_patterns,
            stats: TableStatistics::default(),
        }
    }

    pub fn from_config(config: &crate::config::AggregationConfig) -> Self {
        Self::new(
            config.max_table_width,
            config.max_rows_per_table,
            config.auto_format_patterns.clone(),
        )
    }

    /// Allow-listed type, at least two records and small enough to list
    pub fn should_format(&self, group: &PatternGroup) -> bool {
        self.auto_format_patterns.contains(&group.pattern_type)
            && group.count >= 2
            && group.records.len() <= self.max_rows_per_table
    }

    /// Table records for every group that qualifies
    ///
    /// A group whose table cannot be built yields an ERROR record instead.
    pub fn format_patterns_as_tables(&mut self, groups: &[PatternGroup]) -> Vec<BufferedLogRecord> {
        let mut tables = Vec::new();
        for group in groups {
            if !self.should_format(group) {
                continue;
            }
            let record = match self.format_pattern_group(group) {
                Ok(record) => record,
                Err(error) => self.error_record(group, &error),
            };
            tables.push(BufferedLogRecord::processed(record));
        }
        tables
    }

    /// Render one group as a multi-line table record
    pub fn format_pattern_group(&mut self, group: &PatternGroup) -> Result<LogRecord> {
        let first = group
            .records
            .first()
            .ok_or_else(|| AggregatorError::Table(format!("pattern {} has no records", group.pattern_id)))?;

        let data = build_table(group, self.max_rows_per_table);
        let table = format_ascii_table(&data.headers, &data.rows, self.max_table_width)?;

        self.stats.tables_created += 1;
        self.stats.rows_rendered += data.rows.len() as u64;
        *self
            .stats
            .tables_by_type
            .entry(group.pattern_type.as_str().to_string())
            .or_insert(0) += 1;

        let message = format!("{}\n{}\n{}", data.title, table, data.summary);
        Ok(LogRecord::new(first.record.level, &first.record.logger_name, message)
            .with_created(group.start_time))
    }

    /// Synthetic ERROR record standing in for a table that could not be built
    pub fn error_record(&mut self, group: &PatternGroup, error: &AggregatorError) -> LogRecord {
        self.stats.formatting_errors += 1;
        tracing::warn!(
            target: "aggregated_logging::internal",
            pattern_id = %group.pattern_id,
            error = %error,
            "table formatting failed"
        );
        let logger = group
            .records
            .first()
            .map_or("aggregated_logging", |buffered| buffered.record.logger_name.as_str());
        LogRecord::new(
            LogLevel::Error,
            logger,
            format!(
                "[TABLE FORMATTING ERROR] {} ({} records): {}",
                group.pattern_type.as_str(),
                group.count,
                error
            ),
        )
    }

    pub fn get_statistics(&self) -> TableStatistics {
        self.stats.clone()
    }
}

fn time_of(buffered: &BufferedLogRecord) -> String {
    buffered.record.created.format("%H:%M:%S%.3f").to_string()
}

fn type_title(pattern_type: PatternType) -> &'static str {
    match pattern_type {
        PatternType::PlotLinesAddition => "Plot lines added",
        PatternType::CascadeComponentInitialization => "Component initialization",
        PatternType::RequestResponseCycle => "Request/response cycle",
        PatternType::FileOperations => "File operations",
        PatternType::GuiUpdates => "GUI updates",
        PatternType::BasicSimilarity => "Repeated messages",
    }
}

/// Type-specific table for a group, rows capped at `max_rows`
pub fn build_table(group: &PatternGroup, max_rows: usize) -> TableData {
    let span = format_duration((group.end_time - group.start_time).num_microseconds().unwrap_or(0) as f64 / 1000.0);
    let title = format!("📊 {} ({} records, {})", type_title(group.pattern_type), group.count, span);
    let records = group.records.iter().take(max_rows);
    let headers = |names: &[&str]| names.iter().map(|name| name.to_string()).collect::<Vec<_>>();

    match &group.metadata {
        PatternMetadata::PlotLines { line_names } => TableData {
            title,
            headers: headers(&["#", "Line", "Logger", "Time"]),
            rows: records
                .enumerate()
                .map(|(index, buffered)| {
                    vec![
                        (index + 1).to_string(),
                        line_names.get(index).cloned().unwrap_or_default(),
                        buffered.record.logger_name.clone(),
                        time_of(buffered),
                    ]
                })
                .collect(),
            summary: format!("Added {} plot lines in {}", line_names.len(), span),
        },
        PatternMetadata::Cascade { components } => TableData {
            title,
            headers: headers(&["Step", "Module", "Message", "Time"]),
            rows: records
                .enumerate()
                .map(|(index, buffered)| {
                    vec![
                        (index + 1).to_string(),
                        buffered.record.module.clone(),
                        safe_get_message(&buffered.record),
                        time_of(buffered),
                    ]
                })
                .collect(),
            summary: format!("Initialized {} components: {}", components.len(), components.join(" → ")),
        },
        PatternMetadata::RequestResponse { requests, responses } => TableData {
            title,
            headers: headers(&["#", "Kind", "Logger", "Message"]),
            rows: records
                .enumerate()
                .map(|(index, buffered)| {
                    let message = safe_get_message(&buffered.record);
                    let kind = if message.to_lowercase().contains("response") {
                        "response"
                    } else {
                        "request"
                    };
                    vec![
                        (index + 1).to_string(),
                        kind.to_string(),
                        buffered.record.logger_name.clone(),
                        message,
                    ]
                })
                .collect(),
            summary: format!("{requests} requests, {responses} responses"),
        },
        PatternMetadata::FileOperations { operations, extensions } => TableData {
            title,
            headers: headers(&["#", "File", "Message", "Time"]),
            rows: records
                .enumerate()
                .map(|(index, buffered)| {
                    let message = safe_get_message(&buffered.record);
                    let file = FILE_NAME_PATTERN
                        .find(&message)
                        .map(|found| found.as_str().to_string())
                        .unwrap_or_default();
                    vec![(index + 1).to_string(), file, message, time_of(buffered)]
                })
                .collect(),
            summary: format!(
                "{} file operations ({}) on {} files",
                group.count,
                operations.join(", "),
                extensions.join(", ")
            ),
        },
        PatternMetadata::GuiUpdates { update_types } => TableData {
            title,
            headers: headers(&["#", "Component", "Message", "Time"]),
            rows: records
                .enumerate()
                .map(|(index, buffered)| {
                    vec![
                        (index + 1).to_string(),
                        buffered.record.module.clone(),
                        safe_get_message(&buffered.record),
                        time_of(buffered),
                    ]
                })
                .collect(),
            summary: format!("{} GUI updates ({})", group.count, update_types.join(", ")),
        },
        PatternMetadata::Basic { template } => TableData {
            title,
            headers: headers(&["#", "Time", "Level", "Message"]),
            rows: records
                .enumerate()
                .map(|(index, buffered)| {
                    vec![
                        (index + 1).to_string(),
                        time_of(buffered),
                        buffered.record.level.to_string(),
                        safe_get_message(&buffered.record),
                    ]
                })
                .collect(),
            summary: format!("{} occurrences of \"{}\"", group.count, template),
        },
    }
}

fn truncate(cell: &str, width: usize) -> String {
    if cell.chars().count() <= width {
        return cell.to_string();
    }
    let mut truncated: String = cell.chars().take(width.saturating_sub(1)).collect();
    truncated.push(ELLIPSIS);
    truncated
}

/// Column widths fitted into `max_width` including borders
pub fn compute_column_widths(headers: &[String], rows: &[Vec<String>], max_width: usize) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.lines().map(|line| line.chars().count()).max().unwrap_or(0));
        }
    }

    let borders = 3 * widths.len() + 1;
    let content: usize = widths.iter().sum();
    if content + borders > max_width && content > 0 {
        let available = max_width.saturating_sub(borders);
        for width in widths.iter_mut() {
            *width = (*width * available / content).max(MIN_COLUMN_WIDTH);
        }
    }
    widths
}

/// Box-drawing table; every row must have one cell per header
pub fn format_ascii_table(headers: &[String], rows: &[Vec<String>], max_width: usize) -> Result<String> {
    if headers.is_empty() {
        return Err(AggregatorError::Table("table has no columns".to_string()));
    }
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != headers.len()) {
        return Err(AggregatorError::Table(format!(
            "row {} has {} cells, expected {}",
            index + 1,
            row.len(),
            headers.len()
        )));
    }

    let widths = compute_column_widths(headers, rows, max_width);
    let rule = |left: char, middle: char, right: char| {
        let segments: Vec<String> = widths.iter().map(|width| "─".repeat(width + 2)).collect();
        format!("{left}{}{right}", segments.join(&middle.to_string()))
    };
    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| {
                let flat = cell.replace('\n', " ");
                format!(" {:<width$} ", truncate(&flat, width))
            })
            .collect();
        format!("│{}│", padded.join("│"))
    };

    let mut lines = vec![rule('┌', '┬', '┐'), line(headers), rule('├', '┼', '┤')];
    lines.extend(rows.iter().map(|row| line(row)));
    lines.push(rule('└', '┴', '┘'));
    Ok(lines.join("\n"))
}
