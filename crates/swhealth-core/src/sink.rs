//! Persistence of run results.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::PersistenceError;
use crate::result::RunResult;

/// Timestamp layout embedded in result file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Destination for finished run results.
pub trait OutputSink: Send + Sync {
    /// Persist `result` under `dir` and return the written path.
    fn save(&self, result: &RunResult, dir: &Path) -> Result<PathBuf, PersistenceError>;
}

/// Writes pretty-printed JSON files named `<prefix>_<YYYYMMDD_HHMMSS>.json`.
///
/// The timestamp is the run's `execution_time`. Writes are atomic and never
/// replace an existing file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    prefix: String,
}

impl JsonFileSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn file_name(&self, result: &RunResult) -> String {
        format!(
            "{}_{}.json",
            self.prefix,
            result.execution_time.format(FILE_TIMESTAMP_FORMAT)
        )
    }
}

impl OutputSink for JsonFileSink {
    fn save(&self, result: &RunResult, dir: &Path) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(dir).map_err(|source| PersistenceError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(self.file_name(result));
        if path.exists() {
            return Err(PersistenceError::AlreadyExists(path));
        }

        let body = serde_json::to_vec_pretty(result)?;
        let write_err = |source: std::io::Error| PersistenceError::Write {
            path: path.clone(),
            source,
        };

        // Temp file in the same directory so the rename stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&body).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                PersistenceError::AlreadyExists(path.clone())
            } else {
                write_err(e.error)
            }
        })?;

        Ok(path)
    }
}
