//! Value compression for oversized data embedded in messages
//!
//! Free-text messages are scanned for numeric arrays, dataframe dumps, named
//! dictionary blocks and long quoted strings. Anything above its threshold is
//! replaced by a short `📊` marker and the original text is cached so error
//! analysis can recover the full message later. The scan is a heuristic: nested
//! braces and escaped quotes are not parsed.

use crate::config::AggregationConfig;
use crate::record::{safe_get_message, LogRecord};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

const PREVIEW_ITEMS: usize = 3;
const STRING_PREVIEW_CHARS: usize = 50;

lazy_static! {
    static ref ARRAY_PATTERN: Regex = Regex::new(
        r"\[\s*-?\d+(?:\.\d*)?(?:[eE][-+]?\d+)?(?:(?:\s*,\s*|\s+)-?\d+(?:\.\d*)?(?:[eE][-+]?\d+)?)*\s*,?\s*\]"
    )
    .unwrap();
    static ref ARRAY_SEPARATOR: Regex = Regex::new(r"[\s,]+").unwrap();
    static ref DATAFRAME_PATTERN: Regex =
        Regex::new(r"\n((?:.*\n)+?)\s*\[(\d+) rows x (\d+) columns\]").unwrap();
    static ref NAMED_DICT_PATTERN: Regex = Regex::new(
        r"(?i)\b(coeffs|coefficients|bounds|request|params|kwargs)(\s*[:=]\s*)(\{[^{}]*\})"
    )
    .unwrap();
    static ref DICT_KEY_PATTERN: Regex =
        Regex::new(r#"[{,]\s*['"]?([\w.\- ]+?)['"]?\s*:"#).unwrap();
    static ref QUOTED_STRING_PATTERN: Regex =
        Regex::new(r#"(^|[\s=:(\[{,])("[^"\n]*"|'[^'\n]*')"#).unwrap();
}

/// Kind of value that was compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Array,
    DataFrame,
    Dict,
    String,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Array => "array",
            ValueKind::DataFrame => "dataframe",
            ValueKind::Dict => "dict",
            ValueKind::String => "string",
        }
    }
}

/// Compressed form of one oversized value
#[derive(Debug, Clone, Serialize)]
pub struct ValueSummary {
    pub original_length: usize,
    pub data_type: ValueKind,
    pub shape: Option<String>,
    pub preview: String,
    pub full_content: String,
}

/// Thresholds at which a value is compressed
#[derive(Debug, Clone, Copy)]
pub struct ValueThresholds {
    pub array: usize,
    pub dataframe: usize,
    pub dict: usize,
    pub string: usize,
}

impl Default for ValueThresholds {
    fn default() -> Self {
        Self {
            array: 10,
            dataframe: 5,
            dict: 8,
            string: 200,
        }
    }
}

impl From<&AggregationConfig> for ValueThresholds {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            array: config.array_threshold,
            dataframe: config.dataframe_threshold,
            dict: config.dict_threshold,
            string: config.string_threshold,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    original_message: String,
    summaries: Vec<ValueSummary>,
}

/// `(created timestamp in nanoseconds, record id)`
type CacheKey = (i64, u64);

fn cache_key(record: &LogRecord) -> CacheKey {
    let nanos = record
        .created
        .timestamp_nanos_opt()
        .unwrap_or_else(|| record.created.timestamp_micros());
    (nanos, record.id)
}

#[derive(Debug, Default)]
struct ValueState {
    cache: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    messages_processed: u64,
    messages_compressed: u64,
    values_compressed: HashMap<ValueKind, u64>,
    characters_saved: u64,
    cache_evictions: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValueStatistics {
    pub messages_processed: u64,
    pub messages_compressed: u64,
    pub arrays_compressed: u64,
    pub dataframes_compressed: u64,
    pub dicts_compressed: u64,
    pub strings_compressed: u64,
    pub characters_saved: u64,
    pub cache_size: usize,
    pub cache_size_limit: usize,
    pub cache_evictions: u64,
}

/// Compresses large values and keeps the originals in a bounded FIFO cache
#[derive(Debug)]
pub struct ValueAggregator {
    thresholds: ValueThresholds,
    cache_size_limit: usize,
    state: Mutex<ValueState>,
}

impl ValueAggregator {
    pub fn new(thresholds: ValueThresholds, cache_size_limit: usize) -> Self {
        Self {
            thresholds,
            cache_size_limit: cache_size_limit.max(1),
            state: Mutex::new(ValueState::default()),
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::new(ValueThresholds::from(config), config.cache_size_limit)
    }

    fn lock(&self) -> MutexGuard<'_, ValueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rendered message with oversized values replaced by markers
    pub fn process_message(&self, record: &LogRecord) -> String {
        self.process(record).0
    }

    /// Compressed message, or `None` when nothing exceeded its threshold
    pub fn compress_record(&self, record: &LogRecord) -> Option<String> {
        match self.process(record) {
            (message, true) => Some(message),
            (_, false) => None,
        }
    }

    fn process(&self, record: &LogRecord) -> (String, bool) {
        let message = safe_get_message(record);
        let (compressed, summaries) = self.compress(&message);

        let mut state = self.lock();
        state.messages_processed += 1;
        if summaries.is_empty() {
            return (message, false);
        }

        state.messages_compressed += 1;
        state.characters_saved +=
            message.chars().count().saturating_sub(compressed.chars().count()) as u64;
        for summary in &summaries {
            *state.values_compressed.entry(summary.data_type).or_insert(0) += 1;
        }

        let key = cache_key(record);
        if !state.cache.contains_key(&key) {
            while state.order.len() >= self.cache_size_limit {
                if let Some(oldest) = state.order.pop_front() {
                    state.cache.remove(&oldest);
                    state.cache_evictions += 1;
                }
            }
            state.order.push_back(key);
        }
        state.cache.insert(
            key,
            CacheEntry {
                original_message: message,
                summaries,
            },
        );
        (compressed, true)
    }

    /// Uncompressed message of a record processed earlier, if still cached
    pub fn get_full_context(&self, record: &LogRecord) -> Option<String> {
        self.lock()
            .cache
            .get(&cache_key(record))
            .map(|entry| entry.original_message.clone())
    }

    /// Summaries of the values compressed out of a record's message
    pub fn get_summaries(&self, record: &LogRecord) -> Vec<ValueSummary> {
        self.lock()
            .cache
            .get(&cache_key(record))
            .map(|entry| entry.summaries.clone())
            .unwrap_or_default()
    }

    /// Compress every oversized value in `message`
    pub fn compress(&self, message: &str) -> (String, Vec<ValueSummary>) {
        let mut summaries = Vec::new();
        let thresholds = self.thresholds;

        let text = ARRAY_PATTERN.replace_all(message, |caps: &Captures| {
            let literal = &caps[0];
            let items: Vec<&str> = ARRAY_SEPARATOR
                .split(literal.trim_start_matches('[').trim_end_matches(']'))
                .filter(|item| !item.is_empty())
                .collect();
            if items.len() < thresholds.array {
                return literal.to_string();
            }
            let preview = format!("{}, ...", items[..PREVIEW_ITEMS.min(items.len())].join(", "));
            summaries.push(ValueSummary {
                original_length: literal.chars().count(),
                data_type: ValueKind::Array,
                shape: Some(format!("({},)", items.len())),
                preview: preview.clone(),
                full_content: literal.to_string(),
            });
            format!("📊 array({} items) [{}]", items.len(), preview)
        });

        let text = DATAFRAME_PATTERN.replace_all(&text, |caps: &Captures| {
            let rows: usize = caps[2].parse().unwrap_or(0);
            let cols: usize = caps[3].parse().unwrap_or(0);
            if rows < thresholds.dataframe {
                return caps[0].to_string();
            }
            let header = caps[1]
                .lines()
                .next()
                .unwrap_or_default()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(", ");
            summaries.push(ValueSummary {
                original_length: caps[0].chars().count(),
                data_type: ValueKind::DataFrame,
                shape: Some(format!("({rows}, {cols})")),
                preview: header.clone(),
                full_content: caps[0].to_string(),
            });
            format!(" 📊 dataframe({rows} rows x {cols} cols) [{header}]")
        });

        let text = NAMED_DICT_PATTERN.replace_all(&text, |caps: &Captures| {
            let block = &caps[3];
            let keys: Vec<&str> = DICT_KEY_PATTERN
                .captures_iter(block)
                .filter_map(|key| key.get(1).map(|m| m.as_str().trim()))
                .collect();
            if keys.len() < thresholds.dict {
                return caps[0].to_string();
            }
            let preview = format!("{}, ...", keys[..PREVIEW_ITEMS.min(keys.len())].join(", "));
            summaries.push(ValueSummary {
                original_length: block.chars().count(),
                data_type: ValueKind::Dict,
                shape: Some(format!("{} keys", keys.len())),
                preview: preview.clone(),
                full_content: block.to_string(),
            });
            format!("{}{}📊 dict({} items) [{}]", &caps[1], &caps[2], keys.len(), preview)
        });

        let text = QUOTED_STRING_PATTERN.replace_all(&text, |caps: &Captures| {
            let quoted = &caps[2];
            let inner: String = quoted.chars().skip(1).take(quoted.chars().count() - 2).collect();
            let length = inner.chars().count();
            if length < thresholds.string {
                return caps[0].to_string();
            }
            let preview: String = inner.chars().take(STRING_PREVIEW_CHARS).collect();
            summaries.push(ValueSummary {
                original_length: length,
                data_type: ValueKind::String,
                shape: None,
                preview: preview.clone(),
                full_content: quoted.to_string(),
            });
            format!("{}📊 string({length} chars) [\"{preview}...\"]", &caps[1])
        });

        (text.into_owned(), summaries)
    }

    pub fn cache_len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn clear_cache(&self) {
        let mut state = self.lock();
        state.cache.clear();
        state.order.clear();
    }

    pub fn get_statistics(&self) -> ValueStatistics {
        let state = self.lock();
        let count = |kind| state.values_compressed.get(&kind).copied().unwrap_or(0);
        ValueStatistics {
            messages_processed: state.messages_processed,
            messages_compressed: state.messages_compressed,
            arrays_compressed: count(ValueKind::Array),
            dataframes_compressed: count(ValueKind::DataFrame),
            dicts_compressed: count(ValueKind::Dict),
            strings_compressed: count(ValueKind::String),
            characters_saved: state.characters_saved,
            cache_size: state.cache.len(),
            cache_size_limit: self.cache_size_limit,
            cache_evictions: state.cache_evictions,
        }
    }
}
