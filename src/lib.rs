//! Real-time log aggregation and operation tracing
//!
//! Records flow through a [`RealtimeAggregatingHandler`] in front of any
//! [`LogSink`]: oversized values are compressed, error records are expanded with
//! context and suggestions, and repetitive records are folded into aggregated
//! or tabular summaries. [`operations::OperationLogger`] traces calls and their
//! nested dispatches into the same output.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod logging;
pub mod operations;
pub mod record;
pub mod sink;

pub use aggregator::RealtimeAggregatingHandler;
pub use config::AggregationConfig;
pub use error::{AggregatorError, Result};
pub use record::{ExceptionInfo, FormatArg, LogLevel, LogRecord};
pub use sink::{LogSink, MemorySink, RotatingFileSink, TracingSink, WriterSink};
