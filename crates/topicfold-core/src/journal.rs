//! Append-only, date-partitioned run log.
//!
//! Sink failures never reach the pipeline: they are reported through
//! `tracing` and otherwise ignored.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::warn;

use crate::CoreError;

/// Destination for human-readable run log lines.
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str);
}

/// Discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

impl LogSink for NullLog {
    fn append(&self, _line: &str) {}
}

/// Appends lines to `<dir>/<YYYY-MM-DD>.txt`, one file per UTC day.
#[derive(Debug)]
pub struct DailyLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DailyLog {
    /// Open a log directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds the lines for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{date}.txt"))
    }

    fn try_append(&self, line: &str) -> std::io::Result<()> {
        let path = self.path_for(Utc::now().date_naive());
        // A poisoned lock only means another writer panicked mid-line.
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")
    }
}

impl LogSink for DailyLog {
    fn append(&self, line: &str) {
        if let Err(e) = self.try_append(line) {
            warn!(dir = %self.dir.display(), error = %e, "failed to append to run log");
        }
    }
}
