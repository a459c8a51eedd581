//! Log file rotation and retention policies
//!
//! Used by [`crate::sink::RotatingFileSink`]: the active file is archived (and
//! optionally gzip-compressed) once it grows past the size limit or gets older
//! than the age limit, and the oldest archives are removed beyond `max_files`.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Log rotation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Maximum file size before rotation (in bytes)
    pub max_file_size: u64,

    /// Maximum age before rotation (in hours)
    pub max_file_age_hours: u64,

    /// Maximum number of archived files to keep
    pub max_files: usize,

    /// Directory for archived log files
    pub archive_directory: Option<PathBuf>,

    /// Enable compression for archived files
    pub compress_archives: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_file_age_hours: 24,
            max_files: 10,
            archive_directory: None,
            compress_archives: true,
        }
    }
}

/// Archives log files according to a [`RotationConfig`]
#[derive(Debug)]
pub struct LogRotationManager {
    config: RotationConfig,
    archive_directory: PathBuf,
    rotations: AtomicU64,
}

impl LogRotationManager {
    /// Create the manager, creating the archive directory next to `log_file`
    pub fn new(log_file: &Path, config: RotationConfig) -> Result<Self> {
        let log_directory = log_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let archive_directory = config
            .archive_directory
            .clone()
            .unwrap_or_else(|| log_directory.join("archive"));

        fs::create_dir_all(&log_directory)?;
        fs::create_dir_all(&archive_directory)?;

        Ok(Self {
            config,
            archive_directory,
            rotations: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// True once the active file is too large or too old
    pub fn needs_rotation(&self, size: u64, age: Duration) -> bool {
        if size >= self.config.max_file_size {
            info!(
                size_bytes = size,
                max_size_bytes = self.config.max_file_size,
                "Log file needs rotation due to size"
            );
            return true;
        }
        let max_age = Duration::from_secs(self.config.max_file_age_hours * 3600);
        size > 0 && age >= max_age
    }

    /// Move `log_file` into the archive directory, returning the archive path
    pub fn rotate_log(&self, log_file: &Path) -> Result<Option<PathBuf>> {
        if !log_file.exists() {
            warn!("Cannot rotate non-existent log file: {}", log_file.display());
            return Ok(None);
        }

        let sequence = self.rotations.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let file_stem = log_file.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
        let extension = log_file.extension().and_then(|s| s.to_str()).unwrap_or("log");

        let archive_name = if self.config.compress_archives {
            format!("{}_{}_{}.{}.gz", file_stem, timestamp, sequence, extension)
        } else {
            format!("{}_{}_{}.{}", file_stem, timestamp, sequence, extension)
        };
        let archive_path = self.archive_directory.join(archive_name);

        info!(
            source = %log_file.display(),
            archive = %archive_path.display(),
            compressed = self.config.compress_archives,
            "Rotating log file"
        );

        if self.config.compress_archives {
            compress_and_archive(log_file, &archive_path)?;
        } else {
            fs::rename(log_file, &archive_path)?;
        }

        self.cleanup_old_archives()?;
        Ok(Some(archive_path))
    }

    /// Remove archives beyond `max_files`, oldest first; returns how many were removed
    pub fn cleanup_old_archives(&self) -> Result<usize> {
        let mut archive_files = Vec::new();
        for entry in fs::read_dir(&self.archive_directory)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                let modified = entry.metadata()?.modified()?;
                archive_files.push((path, modified));
            }
        }

        archive_files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let files_to_remove = archive_files.len().saturating_sub(self.config.max_files);

        for (file_path, _) in archive_files.iter().take(files_to_remove) {
            info!(file = %file_path.display(), "Removing old archive file due to retention policy");
            if let Err(e) = fs::remove_file(file_path) {
                warn!("Failed to remove archive file {}: {}", file_path.display(), e);
            }
        }
        Ok(files_to_remove)
    }

    pub fn get_statistics(&self) -> ArchiveStatistics {
        let mut archive_files = 0;
        let mut archive_size_bytes = 0;
        if let Ok(entries) = fs::read_dir(&self.archive_directory) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    if metadata.is_file() {
                        archive_files += 1;
                        archive_size_bytes += metadata.len();
                    }
                }
            }
        }
        ArchiveStatistics {
            rotations: self.rotations.load(Ordering::Relaxed),
            archive_files,
            archive_size_bytes,
            archive_directory: self.archive_directory.clone(),
        }
    }
}

fn compress_and_archive(source: &Path, target: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(target)?);

    let mut encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(source)?;
    Ok(())
}

/// Statistics about archived log files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveStatistics {
    pub rotations: u64,
    pub archive_files: usize,
    pub archive_size_bytes: u64,
    pub archive_directory: PathBuf,
}

impl ArchiveStatistics {
    pub fn archive_size_mb(&self) -> f64 {
        self.archive_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[test]
    fn test_archive_directory_next_to_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let log_file = temp_dir.path().join("nested").join("pipeline.log");
        let manager = LogRotationManager::new(&log_file, RotationConfig::default()).unwrap();

        let archive = temp_dir.path().join("nested").join("archive");
        assert!(archive.is_dir());
        assert_eq!(manager.get_statistics().archive_directory, archive);
    }

    #[test]
    fn test_needs_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let config = RotationConfig {
            max_file_size: 100,
            max_file_age_hours: 1,
            ..Default::default()
        };
        let manager = LogRotationManager::new(&temp_dir.path().join("out.log"), config).unwrap();
        assert!(manager.needs_rotation(200, Duration::ZERO));
        assert!(!manager.needs_rotation(50, Duration::from_secs(60)));
        assert!(manager.needs_rotation(50, Duration::from_secs(7200)));
        assert!(!manager.needs_rotation(0, Duration::from_secs(7200)));
    }

    #[test]
    fn test_rotate_compresses_archive() {
        let temp_dir = TempDir::new().unwrap();
        let log_file = temp_dir.path().join("out.log");
        let manager = LogRotationManager::new(&log_file, RotationConfig::default()).unwrap();

        File::create(&log_file).unwrap().write_all(b"archived line\n").unwrap();
        let archive = manager.rotate_log(&log_file).unwrap().unwrap();
        assert!(!log_file.exists());

        let mut contents = String::new();
        GzDecoder::new(File::open(&archive).unwrap())
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "archived line\n");
        assert_eq!(manager.get_statistics().archive_files, 1);
    }

    #[test]
    fn test_retention_removes_oldest() {
        let temp_dir = TempDir::new().unwrap();
        let log_file = temp_dir.path().join("out.log");
        let config = RotationConfig {
            max_files: 2,
            compress_archives: false,
            ..Default::default()
        };
        let manager = LogRotationManager::new(&log_file, config).unwrap();
        for i in 0..4 {
            File::create(&log_file).unwrap().write_all(format!("{i}").as_bytes()).unwrap();
            manager.rotate_log(&log_file).unwrap();
        }
        let stats = manager.get_statistics();
        assert_eq!(stats.archive_files, 2);
        assert_eq!(stats.rotations, 4);
    }
}
