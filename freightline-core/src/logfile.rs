//! The run log file (part of C10): a plain-text log, one record per line, each prefixed by an
//! ISO-8601 timestamp (spec §6 "Persisted files").
//!
//! Grounded on [`crate::persist::write_atomic`]'s discipline of never letting a reader observe a
//! half-written file — here achieved by simple append-only writes instead, since a log is read
//! only after the run (or never, if it is only shipped to the transport endpoint).

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

/// An append-only, line-oriented log file for one run.
pub struct RunLog {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl RunLog {
    /// Open (creating if necessary) the log file at `path` for appending.
    pub fn open(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one record, stamping it with the current time.
    pub fn line(&self, message: impl AsRef<str>) {
        let stamped = format!("[{}] {}\n", Utc::now().to_rfc3339(), message.as_ref());
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = file.write_all(stamped.as_bytes());
    }

    /// Where this log is written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
