//! Log aggregation pipeline
//!
//! [`RealtimeAggregatingHandler`] orchestrates the stages: buffering, pattern
//! detection, aggregation, value compression, error expansion, tabular
//! formatting and cascade withholding.

pub mod buffer;
pub mod cascade;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod patterns;
pub mod tables;
pub mod values;

pub use buffer::{BufferManager, BufferStatistics, BufferedLogRecord};
pub use cascade::OperationAggregator;
pub use engine::{AggregatedLogRecord, AggregationEngine};
pub use errors::{classify_error, ErrorClassification, ErrorContext, ErrorExpansionEngine};
pub use handler::RealtimeAggregatingHandler;
pub use patterns::{LogPattern, PatternDetector, PatternGroup, PatternMetadata, PatternType};
pub use tables::TabularFormatter;
pub use values::{ValueAggregator, ValueKind, ValueSummary, ValueThresholds};
