//! The result document (part of C10): the JSON shape persisted to
//! `<resultsDir>/<taskId>-<scanId>.json` and returned to the caller of
//! [`crate::pipeline::scan_and_transport`].

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::Failure;

/// One file that made it all the way through the pipeline and into a package.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessedFile {
    /// This file's identity path (see [`crate::model::FileRef::identity_path`]).
    pub path: String,
    /// Content digest, if digests were computed.
    pub digest: Option<String>,
    /// Path of the package this file ended up in.
    pub package_path: String,
}

/// The outcome of uploading a single package.
#[derive(Clone, Debug, Serialize)]
pub struct TransportRecord {
    /// Path of the package that was (attempted to be) uploaded.
    pub package_path: String,
    /// Whether the upload ultimately succeeded.
    pub success: bool,
    /// Number of files inside the package.
    pub member_count: usize,
    /// The error from the final attempt, if it never succeeded.
    pub error: Option<String>,
}

/// The full result of one `scanAndTransport` run.
#[derive(Clone, Debug, Serialize)]
pub struct ScanResult {
    /// `true` iff `failed_items` is empty.
    pub success: bool,
    /// Files that were packaged (and, if transport is enabled, uploaded).
    pub processed_files: Vec<ProcessedFile>,
    /// Every failure recorded during the run, across all stages.
    pub failed_items: Vec<Failure>,
    /// Paths of every package produced.
    pub package_paths: Vec<String>,
    /// One record per package upload attempt.
    pub transport_summary: Vec<TransportRecord>,
    /// Identity paths suppressed by the persisted cross-run history.
    pub skipped_historical_duplicates: Vec<String>,
    /// Identity paths suppressed by this run's own task-scoped set.
    pub skipped_task_duplicates: Vec<String>,
    /// Where the run's log file was written.
    pub log_file_path: String,
    /// The external task correlator this run was invoked with.
    pub task_id: String,
    /// This run's internally generated scan correlator.
    pub scan_id: String,
    /// Where this result document itself was written.
    pub result_file_path: String,
    /// When the run started.
    pub start_time: DateTime<Utc>,
    /// When the run finished.
    pub end_time: DateTime<Utc>,
    /// Wall-clock duration of the run, in milliseconds.
    pub elapsed_time_ms: u64,
    /// Wall-clock duration spent in each named stage, in milliseconds.
    pub stage_timings: HashMap<String, u64>,
}

impl ScanResult {
    /// Serialize this result to pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

/// Where the result document for `task_id`/`scan_id` should be written.
pub fn result_file_path(results_dir: &std::path::Path, task_id: &str, scan_id: &str) -> PathBuf {
    results_dir.join(format!("{task_id}-{scan_id}.json"))
}
