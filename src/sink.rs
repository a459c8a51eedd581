//! Downstream sinks receiving forwarded records

use crate::error::Result;
use crate::logging::formatters::RecordFormatter;
use crate::logging::rotation::{LogRotationManager, RotationConfig};
use crate::record::{safe_get_message, LogLevel, LogRecord};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Where the aggregating handler forwards records
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        (**self).emit(record)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        lock(&self.records).clone()
    }

    /// Rendered messages in arrival order
    pub fn messages(&self) -> Vec<String> {
        lock(&self.records).iter().map(safe_get_message).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        lock(&self.records).push(record.clone());
        Ok(())
    }
}

/// Writes formatted lines to any writer (stdout, a buffer, a socket)
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
    formatter: RecordFormatter,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self::with_formatter(writer, RecordFormatter::new())
    }

    pub fn with_formatter(writer: W, formatter: RecordFormatter) -> Self {
        Self {
            writer: Mutex::new(writer),
            formatter,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WriterSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LogSink for WriterSink<W> {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        let line = self.formatter.format(record);
        writeln!(lock(&self.writer), "{line}")?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        lock(&self.writer).flush()?;
        Ok(())
    }
}

struct ActiveFile {
    writer: BufWriter<File>,
    written: u64,
    opened: Instant,
}

/// Appends formatted lines to a file, rotating it by size and age
pub struct RotatingFileSink {
    path: PathBuf,
    formatter: RecordFormatter,
    manager: LogRotationManager,
    active: Mutex<ActiveFile>,
}

impl RotatingFileSink {
    pub fn new(path: impl AsRef<Path>, rotation: RotationConfig) -> Result<Self> {
        Self::with_formatter(path, rotation, RecordFormatter::new())
    }

    pub fn with_formatter(path: impl AsRef<Path>, rotation: RotationConfig, formatter: RecordFormatter) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let manager = LogRotationManager::new(&path, rotation)?;
        let active = open_active(&path)?;
        Ok(Self {
            path,
            formatter,
            manager,
            active: Mutex::new(active),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rotation_manager(&self) -> &LogRotationManager {
        &self.manager
    }
}

fn open_active(path: &Path) -> Result<ActiveFile> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let written = file.metadata()?.len();
    Ok(ActiveFile {
        writer: BufWriter::new(file),
        written,
        opened: Instant::now(),
    })
}

impl LogSink for RotatingFileSink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        let mut line = self.formatter.format(record);
        line.push('\n');

        let mut active = lock(&self.active);
        if self.manager.needs_rotation(active.written, active.opened.elapsed()) {
            active.writer.flush()?;
            self.manager.rotate_log(&self.path)?;
            *active = open_active(&self.path)?;
        }
        active.writer.write_all(line.as_bytes())?;
        active.written += line.len() as u64;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        lock(&self.active).writer.flush()?;
        Ok(())
    }
}

/// Re-emits records as tracing events on target `aggregated_logging::output`
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) -> Result<()> {
        let message = safe_get_message(record);
        let logger = record.logger_name.as_str();
        match record.level {
            LogLevel::Debug => tracing::debug!(target: "aggregated_logging::output", logger, "{message}"),
            LogLevel::Info => tracing::info!(target: "aggregated_logging::output", logger, "{message}"),
            LogLevel::Warning => tracing::warn!(target: "aggregated_logging::output", logger, "{message}"),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(target: "aggregated_logging::output", logger, level = %record.level, "{message}")
            }
        }
        Ok(())
    }
}

/// Sink that always fails, for exercising error paths
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingSink;

#[cfg(test)]
impl LogSink for FailingSink {
    fn emit(&self, _record: &LogRecord) -> Result<()> {
        Err(crate::error::AggregatorError::Sink("sink unavailable".to_string()))
    }
}
