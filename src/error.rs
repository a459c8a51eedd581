//! Error types for the aggregation pipeline

use thiserror::Error;

/// Error type for configuration, sink and formatting failures
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown configuration preset: {0}")]
    UnknownPreset(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Table formatting error: {0}")]
    Table(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
