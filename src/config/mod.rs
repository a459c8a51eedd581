//! Aggregation pipeline configuration
//!
//! A flat, recognized-options configuration object with named presets,
//! validation and TOML loading.

use crate::aggregator::patterns::PatternType;
use crate::error::{AggregatorError, Result};
use crate::record::LogLevel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Names accepted by [`AggregationConfig::preset`]
pub const PRESET_NAMES: [&str; 5] = [
    "development",
    "production",
    "testing",
    "backward_compatibility",
    "minimal",
];

/// Every tunable of the aggregation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregationConfig {
    pub enabled: bool,

    /// Buffer size that triggers a flush
    pub buffer_size: usize,

    /// Seconds after which a non-empty buffer is flushed
    pub flush_interval: f64,

    #[serde(alias = "similarity_threshold")]
    pub pattern_similarity_threshold: f64,
    pub min_pattern_entries: usize,

    /// Forward every record immediately; flush only adds summaries
    pub forward_originals: bool,

    pub error_expansion_enabled: bool,
    pub error_threshold_level: LogLevel,
    pub error_context_lines: usize,
    pub error_trace_depth: usize,
    pub error_context_time_window: f64,

    pub tabular_formatting_enabled: bool,
    pub max_table_width: usize,
    pub max_rows_per_table: usize,
    pub auto_format_patterns: Vec<PatternType>,

    pub operation_aggregation_enabled: bool,
    pub cascade_window: f64,
    pub min_cascade_size: usize,
    pub max_cascade_size: usize,

    pub value_aggregation_enabled: bool,
    pub array_threshold: usize,
    pub dataframe_threshold: usize,
    pub dict_threshold: usize,
    pub string_threshold: usize,
    pub cache_size_limit: usize,

    pub max_internal_errors: usize,
    pub error_reset_interval: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 100,
            flush_interval: 5.0,
            pattern_similarity_threshold: 0.8,
            min_pattern_entries: 2,
            forward_originals: false,
            error_expansion_enabled: true,
            error_threshold_level: LogLevel::Warning,
            error_context_lines: 5,
            error_trace_depth: 10,
            error_context_time_window: 10.0,
            tabular_formatting_enabled: true,
            max_table_width: 120,
            max_rows_per_table: 20,
            auto_format_patterns: PatternType::semantic().to_vec(),
            operation_aggregation_enabled: true,
            cascade_window: 1.0,
            min_cascade_size: 3,
            max_cascade_size: 50,
            value_aggregation_enabled: true,
            array_threshold: 10,
            dataframe_threshold: 5,
            dict_threshold: 8,
            string_threshold: 200,
            cache_size_limit: 100,
            max_internal_errors: 10,
            error_reset_interval: 300.0,
        }
    }
}

impl AggregationConfig {
    /// Verbose output with rich context for local work
    pub fn development() -> Self {
        Self {
            buffer_size: 50,
            flush_interval: 2.0,
            error_context_lines: 10,
            error_trace_depth: 15,
            error_context_time_window: 15.0,
            max_table_width: 140,
            max_rows_per_table: 30,
            cache_size_limit: 200,
            ..Self::default()
        }
    }

    /// Larger buffers, errors only, narrower tables
    pub fn production() -> Self {
        Self {
            buffer_size: 200,
            flush_interval: 10.0,
            error_threshold_level: LogLevel::Error,
            error_context_lines: 5,
            error_trace_depth: 5,
            max_table_width: 100,
            max_rows_per_table: 15,
            max_internal_errors: 5,
            error_reset_interval: 600.0,
            ..Self::default()
        }
    }

    /// Small buffers and short intervals so tests observe flushes quickly
    pub fn testing() -> Self {
        Self {
            buffer_size: 10,
            flush_interval: 0.5,
            error_context_lines: 3,
            error_trace_depth: 5,
            error_context_time_window: 5.0,
            max_rows_per_table: 10,
            cache_size_limit: 20,
            error_reset_interval: 60.0,
            ..Self::default()
        }
    }

    /// Every record passes through untouched; only summaries are added
    pub fn backward_compatibility() -> Self {
        Self {
            forward_originals: true,
            error_expansion_enabled: false,
            tabular_formatting_enabled: false,
            operation_aggregation_enabled: false,
            value_aggregation_enabled: false,
            ..Self::default()
        }
    }

    /// Pattern aggregation only
    pub fn minimal() -> Self {
        Self {
            error_expansion_enabled: false,
            tabular_formatting_enabled: false,
            operation_aggregation_enabled: false,
            value_aggregation_enabled: false,
            cache_size_limit: 10,
            ..Self::default()
        }
    }

    /// Look up a named preset
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "development" => Ok(Self::development()),
            "production" => Ok(Self::production()),
            "testing" => Ok(Self::testing()),
            "backward_compatibility" => Ok(Self::backward_compatibility()),
            "minimal" => Ok(Self::minimal()),
            other => Err(AggregatorError::UnknownPreset(other.to_string())),
        }
    }

    /// Parse a TOML document; an optional `preset` key selects the base values
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut table: toml::Table = contents.parse()?;
        let base = match table.remove("preset") {
            Some(toml::Value::String(name)) => Self::preset(&name)?,
            Some(other) => {
                return Err(AggregatorError::InvalidConfig(format!(
                    "preset must be a string, got {}",
                    other.type_str()
                )))
            }
            None => Self::default(),
        };

        let mut merged = match toml::Value::try_from(&base)? {
            toml::Value::Table(merged) => merged,
            other => {
                return Err(AggregatorError::InvalidConfig(format!(
                    "base configuration serialized as {}",
                    other.type_str()
                )))
            }
        };
        merged.extend(table);
        let config: Self = toml::Value::Table(merged).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration and provide helpful error messages
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(AggregatorError::InvalidConfig(message));

        if !(0.0..=1.0).contains(&self.pattern_similarity_threshold) {
            return invalid(format!(
                "pattern_similarity_threshold must be within 0.0..=1.0, got {}",
                self.pattern_similarity_threshold
            ));
        }
        if self.buffer_size == 0 {
            return invalid("buffer_size must be at least 1".to_string());
        }
        if self.min_pattern_entries < 2 {
            return invalid(format!(
                "min_pattern_entries must be at least 2, got {}",
                self.min_pattern_entries
            ));
        }
        for (name, value) in [
            ("flush_interval", self.flush_interval),
            ("error_context_time_window", self.error_context_time_window),
            ("cascade_window", self.cascade_window),
            ("error_reset_interval", self.error_reset_interval),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{name} must be a positive number of seconds, got {value}"));
            }
            if value > MAX_INTERVAL_SECS {
                return invalid(format!(
                    "{name} must be at most {MAX_INTERVAL_SECS} seconds, got {value}"
                ));
            }
        }
        if self.error_threshold_level < LogLevel::Warning {
            return invalid(format!(
                "error_threshold_level must be WARNING, ERROR or CRITICAL, got {}",
                self.error_threshold_level
            ));
        }
        if self.max_table_width < 40 {
            return invalid(format!(
                "max_table_width must be at least 40, got {}",
                self.max_table_width
            ));
        }
        for (name, value) in [
            ("max_rows_per_table", self.max_rows_per_table),
            ("cache_size_limit", self.cache_size_limit),
            ("array_threshold", self.array_threshold),
            ("dataframe_threshold", self.dataframe_threshold),
            ("dict_threshold", self.dict_threshold),
            ("string_threshold", self.string_threshold),
            ("max_internal_errors", self.max_internal_errors),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be at least 1"));
            }
        }
        if self.min_cascade_size < 2 || self.max_cascade_size < self.min_cascade_size {
            return invalid(format!(
                "cascade sizes must satisfy 2 <= min ({}) <= max ({})",
                self.min_cascade_size, self.max_cascade_size
            ));
        }
        Ok(())
    }

    pub fn flush_interval_duration(&self) -> Duration {
        seconds_to_duration(self.flush_interval)
    }

    pub fn error_reset_duration(&self) -> Duration {
        seconds_to_duration(self.error_reset_interval)
    }
}

/// Longest accepted interval setting: one year
pub const MAX_INTERVAL_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Saturating conversion; negative or NaN input maps to zero
fn seconds_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AggregationConfig::default();
        assert!(config.enabled);
        assert_eq!(config.min_pattern_entries, 2);
        assert_eq!(config.error_threshold_level, LogLevel::Warning);
        assert_eq!(config.cache_size_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_all_presets_validate() {
        for name in PRESET_NAMES {
            let config = AggregationConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "preset {name} should validate");
        }
        assert!(matches!(
            AggregationConfig::preset("turbo"),
            Err(AggregatorError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_production_config() {
        let config = AggregationConfig::production();
        assert_eq!(config.error_threshold_level, LogLevel::Error);
        assert!(config.buffer_size > AggregationConfig::default().buffer_size);
    }

    #[test]
    fn test_backward_compatibility_forwards_originals() {
        let config = AggregationConfig::backward_compatibility();
        assert!(config.forward_originals);
        assert!(!config.error_expansion_enabled);
        assert!(!config.value_aggregation_enabled);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AggregationConfig::default();
        config.pattern_similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AggregationConfig::default();
        config.error_threshold_level = LogLevel::Info;
        assert!(config.validate().is_err());

        let mut config = AggregationConfig::default();
        config.flush_interval = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_intervals_rejected_and_saturated() {
        let result = AggregationConfig::from_toml_str("error_reset_interval = 1e30");
        assert!(matches!(result, Err(AggregatorError::InvalidConfig(_))));
        let result = AggregationConfig::from_toml_str("flush_interval = 1e30");
        assert!(matches!(result, Err(AggregatorError::InvalidConfig(_))));

        let config = AggregationConfig {
            error_reset_interval: 1e30,
            flush_interval: f64::INFINITY,
            ..AggregationConfig::default()
        };
        assert_eq!(config.error_reset_duration(), Duration::MAX);
        assert_eq!(config.flush_interval_duration(), Duration::MAX);

        let config = AggregationConfig {
            error_reset_interval: MAX_INTERVAL_SECS,
            ..AggregationConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_with_preset_and_overrides() {
        let config = AggregationConfig::from_toml_str(
            r#"
            preset = "production"
            buffer_size = 7
            error_threshold_level = "CRITICAL"
            "#,
        )
        .unwrap();
        assert_eq!(config.buffer_size, 7);
        assert_eq!(config.error_threshold_level, LogLevel::Critical);
        assert_eq!(config.max_table_width, 100);
    }

    #[test]
    fn test_toml_rejects_unknown_options() {
        let result = AggregationConfig::from_toml_str("buffer_sise = 3");
        assert!(matches!(result, Err(AggregatorError::ConfigParse(_))));
    }

    #[test]
    fn test_toml_round_trip_of_preset() {
        let config = AggregationConfig::testing();
        let text = config.to_toml_string().unwrap();
        let parsed = AggregationConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
