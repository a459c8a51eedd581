//! Logging configuration for the crate's own diagnostics
//!
//! Per-component levels, console and file destinations, and rotation settings
//! for file sinks.

use super::rotation::RotationConfig;
use crate::error::{AggregatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Diagnostics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON diagnostic files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in console output
    pub include_file_location: bool,

    /// Level for the aggregation pipeline (`aggregator`, `internal`)
    pub aggregation_level: String,

    /// Level for operation tracing (`operations`)
    pub operations_level: String,

    /// Rotation used by file sinks
    pub rotation: RotationConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            aggregation_level: "info".to_string(),
            operations_level: "info".to_string(),
            rotation: RotationConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Verbose diagnostics with file locations
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            aggregation_level: "debug".to_string(),
            operations_level: "trace".to_string(),
            rotation: RotationConfig::default(),
        }
    }

    /// Warnings only, written to files
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: false,
            aggregation_level: "warn".to_string(),
            operations_level: "info".to_string(),
            rotation: RotationConfig {
                max_file_size: 500 * 1024 * 1024, // 500MB for production
                max_file_age_hours: 168,
                max_files: 30,
                archive_directory: None,
                compress_archives: true,
            },
        }
    }

    /// Console only, quiet except for problems
    pub fn testing() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            aggregation_level: "warn".to_string(),
            operations_level: "warn".to_string(),
            rotation: RotationConfig {
                max_file_size: 1024 * 1024,
                max_file_age_hours: 1,
                max_files: 2,
                archive_directory: None,
                compress_archives: false,
            },
        }
    }

    /// Validate the configuration and provide helpful error messages
    pub fn validate(&self) -> Result<()> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("aggregation_level", &self.aggregation_level),
            ("operations_level", &self.operations_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(AggregatorError::InvalidConfig(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                )));
            }
        }

        if self.rotation.max_files == 0 {
            return Err(AggregatorError::InvalidConfig(
                "rotation.max_files must be at least 1".to_string(),
            ));
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(AggregatorError::InvalidConfig(format!(
                        "Log directory parent does not exist: {:?}",
                        parent
                    )));
                }
            }
        }

        Ok(())
    }

    /// Get the effective log level for a specific component
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "aggregator" | "aggregation" | "internal" => &self.aggregation_level,
            "operations" => &self.operations_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives derived from the configured levels
    ///
    /// The global level is also the default for every other target, so
    /// application events reach the aggregating layer.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{global},{krate}={global},{krate}::aggregator={agg},{krate}::internal={agg},{krate}::operations={ops}",
            global = self.global_level,
            agg = self.aggregation_level,
            ops = self.operations_level,
        )
    }
}
