//! Event sink (C11): progress and failure callbacks, and the stage-transition bookkeeping that
//! backs `Progress`'s per-stage counters (spec §3 `QueueState`, §4.11).
//!
//! A single [`EventSink`] is constructed by the coordinator and shared (via `Arc`) with the
//! scanner and every stage worker, so callbacks are only ever invoked from one logical place,
//! avoiding the reentrancy spec §4.11 warns about.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::{FailureCallback, ProgressCallback};
use crate::model::{Failure, FileRef};

/// Identifies one stage of the pipeline, for per-stage progress counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Stability checking for filesystem-origin files.
    FileStability,
    /// Stability checking for archive-origin files.
    ArchiveStability,
    /// Content hashing.
    Hash,
    /// Package assembly.
    Packaging,
    /// Remote upload.
    Transport,
}

const STAGES: [Stage; 5] = [
    Stage::FileStability,
    Stage::ArchiveStability,
    Stage::Hash,
    Stage::Packaging,
    Stage::Transport,
];

impl Stage {
    fn index(self) -> usize {
        match self {
            Stage::FileStability => 0,
            Stage::ArchiveStability => 1,
            Stage::Hash => 2,
            Stage::Packaging => 3,
            Stage::Transport => 4,
        }
    }
}

#[derive(Default)]
struct StageCounters {
    waiting: AtomicUsize,
    processing: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    retrying: AtomicUsize,
}

/// A snapshot of one stage's queue state (spec §3 `QueueState`).
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct StageSnapshot {
    /// Items enqueued but not yet picked up by a worker.
    pub waiting: usize,
    /// Items currently being processed by a worker.
    pub processing: usize,
    /// Items that finished this stage successfully.
    pub completed: usize,
    /// Items that terminally failed this stage.
    pub failed: usize,
    /// Items currently waiting out a retry delay before re-entering this stage.
    pub retrying: usize,
    /// Total items that have ever entered this stage.
    pub total: usize,
}

/// A point-in-time snapshot of the whole run's progress (spec §3 `Progress`).
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Progress {
    /// Directories visited so far.
    pub scanned_dirs: usize,
    /// Files (of any kind) stat'd so far.
    pub scanned_files: usize,
    /// Files that matched a rule and entered the pipeline.
    pub matched_files: usize,
    /// Archives opened for enumeration so far.
    pub archives_scanned: usize,
    /// Archives opened while recursing into an already-open archive.
    pub nested_archives_scanned: usize,
    /// Files skipped for exceeding the size cap.
    pub ignored_large_files: usize,
    /// Directories skipped due to `skipDirs` or the self-reference guard.
    pub skipped_dirs: usize,
    /// The deepest archive nesting level observed so far.
    pub current_nesting_level: usize,
    /// Per-stage queue snapshots.
    pub file_stability: StageSnapshot,
    /// See [`Progress::file_stability`].
    pub archive_stability: StageSnapshot,
    /// See [`Progress::file_stability`].
    pub hash: StageSnapshot,
    /// See [`Progress::file_stability`].
    pub packaging: StageSnapshot,
    /// See [`Progress::file_stability`].
    pub transport: StageSnapshot,
}

/// Owns all progress counters and the two user-supplied callbacks; shared across the whole
/// pipeline run.
pub struct EventSink {
    scanned_dirs: AtomicUsize,
    scanned_files: AtomicUsize,
    matched_files: AtomicUsize,
    archives_scanned: AtomicUsize,
    nested_archives_scanned: AtomicUsize,
    ignored_large_files: AtomicUsize,
    skipped_dirs: AtomicUsize,
    current_nesting_level: AtomicUsize,
    stages: [StageCounters; 5],
    failures: Mutex<Vec<Failure>>,
    on_progress: Option<ProgressCallback>,
    on_failure: Option<FailureCallback>,
}

impl EventSink {
    /// Construct a new sink with the given optional user callbacks.
    pub fn new(on_progress: Option<ProgressCallback>, on_failure: Option<FailureCallback>) -> Self {
        Self {
            scanned_dirs: AtomicUsize::new(0),
            scanned_files: AtomicUsize::new(0),
            matched_files: AtomicUsize::new(0),
            archives_scanned: AtomicUsize::new(0),
            nested_archives_scanned: AtomicUsize::new(0),
            ignored_large_files: AtomicUsize::new(0),
            skipped_dirs: AtomicUsize::new(0),
            current_nesting_level: AtomicUsize::new(0),
            stages: Default::default(),
            failures: Mutex::new(Vec::new()),
            on_progress,
            on_failure,
        }
    }

    fn counters(&self, stage: Stage) -> &StageCounters {
        &self.stages[stage.index()]
    }

    /// Record a directory visit.
    pub fn scanned_dir(&self) {
        self.scanned_dirs.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    /// Record a directory skipped via `skipDirs` or the self-reference guard.
    pub fn skipped_dir(&self) {
        self.skipped_dirs.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    /// Record a file (of any kind) being stat'd.
    pub fn scanned_file(&self) {
        self.scanned_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an archive being opened for enumeration.
    pub fn archive_scanned(&self) {
        self.archives_scanned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an archive nested inside another being opened.
    pub fn nested_archive_scanned(&self, nesting_level: usize) {
        self.nested_archives_scanned.fetch_add(1, Ordering::Relaxed);
        self.current_nesting_level.fetch_max(nesting_level, Ordering::Relaxed);
    }

    /// Record a file matching a rule and entering the pipeline.
    pub fn matched(&self, file: &FileRef) {
        self.matched_files.fetch_add(1, Ordering::Relaxed);
        self.current_nesting_level
            .fetch_max(file.nesting_level(), Ordering::Relaxed);
        self.emit_progress(Some(file.clone()));
    }

    /// Record a file ignored for exceeding the size cap (also recorded as a `Failure` by the
    /// caller; this just feeds the dedicated progress counter).
    pub fn ignored_large_file(&self) {
        self.ignored_large_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new failure, invoking the failure callback and appending to the result-bound
    /// failure list.
    pub fn failure(&self, failure: Failure) {
        if failure.kind() == crate::model::FailureKind::IgnoredLargeFile {
            self.ignored_large_file();
        }
        if let Some(cb) = &self.on_failure {
            cb(failure.clone());
        }
        self.failures.lock().expect("failures lock poisoned").push(failure);
    }

    /// An item entered a stage's waiting queue.
    pub fn enqueue(&self, stage: Stage) {
        self.counters(stage).waiting.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    /// A worker picked an item up off the waiting queue.
    pub fn start_processing(&self, stage: Stage) {
        let c = self.counters(stage);
        c.waiting.fetch_sub(1, Ordering::Relaxed);
        c.processing.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    /// An item finished a stage successfully.
    pub fn complete(&self, stage: Stage) {
        let c = self.counters(stage);
        c.processing.fetch_sub(1, Ordering::Relaxed);
        c.completed.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    /// An item terminally failed a stage.
    pub fn fail(&self, stage: Stage) {
        let c = self.counters(stage);
        c.processing.fetch_sub(1, Ordering::Relaxed);
        c.failed.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    /// An item entered (`delta > 0`) or left (`delta < 0`) the retrying bucket for a stage.
    pub fn retry_delta(&self, stage: Stage, delta: i64) {
        let c = self.counters(stage);
        if delta > 0 {
            c.retrying.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            c.retrying.fetch_sub((-delta) as usize, Ordering::Relaxed);
        }
        self.emit_progress(None);
    }

    /// An item failed a retryable stage but has attempts remaining: it leaves `processing` and
    /// enters the `retrying` bucket rather than `failed`.
    pub fn defer_to_retry(&self, stage: Stage) {
        let c = self.counters(stage);
        c.processing.fetch_sub(1, Ordering::Relaxed);
        c.retrying.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    /// An item's retry delay elapsed and it is being resubmitted: it leaves `retrying` and
    /// re-enters `processing`.
    pub fn resume_from_retry(&self, stage: Stage) {
        let c = self.counters(stage);
        c.retrying.fetch_sub(1, Ordering::Relaxed);
        c.processing.fetch_add(1, Ordering::Relaxed);
        self.emit_progress(None);
    }

    fn stage_snapshot(&self, stage: Stage) -> StageSnapshot {
        let c = self.counters(stage);
        let waiting = c.waiting.load(Ordering::Relaxed);
        let processing = c.processing.load(Ordering::Relaxed);
        let completed = c.completed.load(Ordering::Relaxed);
        let failed = c.failed.load(Ordering::Relaxed);
        let retrying = c.retrying.load(Ordering::Relaxed);
        StageSnapshot {
            waiting,
            processing,
            completed,
            failed,
            retrying,
            total: waiting + processing + completed + failed,
        }
    }

    /// Take a point-in-time snapshot of the whole run's progress.
    pub fn snapshot(&self) -> Progress {
        Progress {
            scanned_dirs: self.scanned_dirs.load(Ordering::Relaxed),
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            matched_files: self.matched_files.load(Ordering::Relaxed),
            archives_scanned: self.archives_scanned.load(Ordering::Relaxed),
            nested_archives_scanned: self.nested_archives_scanned.load(Ordering::Relaxed),
            ignored_large_files: self.ignored_large_files.load(Ordering::Relaxed),
            skipped_dirs: self.skipped_dirs.load(Ordering::Relaxed),
            current_nesting_level: self.current_nesting_level.load(Ordering::Relaxed),
            file_stability: self.stage_snapshot(Stage::FileStability),
            archive_stability: self.stage_snapshot(Stage::ArchiveStability),
            hash: self.stage_snapshot(Stage::Hash),
            packaging: self.stage_snapshot(Stage::Packaging),
            transport: self.stage_snapshot(Stage::Transport),
        }
    }

    /// All failures recorded so far, in recording order.
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().expect("failures lock poisoned").clone()
    }

    fn emit_progress(&self, newly_matched: Option<FileRef>) {
        if let Some(cb) = &self.on_progress {
            cb(self.snapshot(), newly_matched);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_transitions_keep_counts_consistent() {
        let sink = EventSink::new(None, None);
        sink.enqueue(Stage::Hash);
        sink.enqueue(Stage::Hash);
        sink.start_processing(Stage::Hash);
        sink.complete(Stage::Hash);

        let snap = sink.snapshot().hash;
        assert_eq!(snap.waiting, 1);
        assert_eq!(snap.processing, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.total, 2);
    }

    #[test]
    fn all_stages_are_represented() {
        assert_eq!(STAGES.len(), 5);
    }
}
