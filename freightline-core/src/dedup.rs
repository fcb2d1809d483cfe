//! Deduplication (C6): a two-tier check against digests already seen in this run and against a
//! history set persisted across runs.
//!
//! No teacher module does exactly this, but the persisted-history half is grounded on
//! `archive::walk::Scratch`'s lifecycle-owning-a-resource pattern generalized to a value that
//! must survive process restarts: a `HistoryStore` owns the set and the file it is persisted to,
//! and nothing outside this module ever touches either directly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::DeduplicatorOptions;

/// The result of checking a digest against the deduplicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckResult {
    /// Not seen before; the caller should proceed to package this file and record the digest.
    New,
    /// Already present in this run's task-scoped set.
    DuplicateInTask,
    /// Already present in the persisted historical set from a previous run.
    DuplicateInHistory,
}

/// The persisted cross-run digest history.
///
/// Loaded once at startup, mutated in memory as new digests are confirmed uploaded, and flushed
/// back to disk via atomic temp-then-rename (see [`crate::persist::write_atomic`]) either
/// periodically or once at the end of a run.
pub struct HistoryStore {
    path: PathBuf,
    digests: Mutex<HashSet<String>>,
    dirty: std::sync::atomic::AtomicBool,
}

impl HistoryStore {
    /// Load the history set from `path`, treating a missing or unparsable file as an empty set
    /// (this is a best-effort cache, not a source of truth worth failing a run over).
    pub async fn load(path: PathBuf) -> Self {
        let digests = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<String>>(&bytes)
                .map(|v| v.into_iter().collect())
                .unwrap_or_default(),
            Err(_) => HashSet::new(),
        };
        Self {
            path,
            digests: Mutex::new(digests),
            dirty: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Whether `digest` is already present in the historical set.
    pub fn contains(&self, digest: &str) -> bool {
        self.digests.lock().expect("history lock poisoned").contains(digest)
    }

    /// Record `digest` as historically uploaded. Marks the store dirty so the next
    /// [`HistoryStore::flush_if_dirty`] call persists it.
    pub fn insert(&self, digest: String) {
        let inserted = self.digests.lock().expect("history lock poisoned").insert(digest);
        if inserted {
            self.dirty.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Persist the set to disk if it has changed since the last flush.
    pub async fn flush_if_dirty(&self) -> std::io::Result<()> {
        if !self.dirty.swap(false, std::sync::atomic::Ordering::Relaxed) {
            return Ok(());
        }
        let snapshot: Vec<String> = self
            .digests
            .lock()
            .expect("history lock poisoned")
            .iter()
            .cloned()
            .collect();
        let body = serde_json::to_vec_pretty(&snapshot).expect("history set serializes infallibly");
        crate::persist::write_atomic(&self.path, &body).await
    }
}

/// Per-run deduplication state: the task-scoped set plus a reference to the persisted history.
pub struct Deduplicator {
    options: DeduplicatorOptions,
    task_digests: Mutex<HashSet<String>>,
}

impl Deduplicator {
    /// Build a fresh, empty task-scoped deduplicator.
    pub fn new(options: DeduplicatorOptions) -> Self {
        Self {
            options,
            task_digests: Mutex::new(HashSet::new()),
        }
    }

    /// Check `digest` against history (if enabled) then the task-scoped set (if enabled), in
    /// that order, per spec §4.6, claiming it in the task-scoped set in the same critical
    /// section as a [`CheckResult::New`] verdict.
    ///
    /// The check and the claim must be atomic: two concurrent hash-stage workers computing the
    /// same digest must not both observe `New` and proceed to package it, which would put two
    /// entries with the same digest in `processedFiles`. Taking the lock once across both the
    /// `contains` test and the `insert` closes that window; a caller never sees `New` without
    /// the digest already being recorded.
    pub fn check_and_claim(&self, digest: &str, history: &HistoryStore) -> CheckResult {
        if !self.options.enabled {
            return CheckResult::New;
        }
        if self.options.use_historical && history.contains(digest) {
            return CheckResult::DuplicateInHistory;
        }
        if self.options.use_task {
            let mut set = self.task_digests.lock().expect("task digests lock poisoned");
            if !set.insert(digest.to_owned()) {
                return CheckResult::DuplicateInTask;
            }
        }
        CheckResult::New
    }
}

/// Generate a fresh, isolated history file path for tests.
#[cfg(test)]
fn temp_history_path(dir: &Path) -> PathBuf {
    dir.join("historical-uploads.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn historical_duplicate_wins_over_new_task_digest() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::load(temp_history_path(dir.path())).await;
        history.insert("abc123".to_owned());

        let dedup = Deduplicator::new(DeduplicatorOptions::builder().build());
        assert_eq!(dedup.check_and_claim("abc123", &history), CheckResult::DuplicateInHistory);
    }

    #[tokio::test]
    async fn second_occurrence_in_task_is_flagged_after_the_first_claims_it() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::load(temp_history_path(dir.path())).await;

        let dedup = Deduplicator::new(DeduplicatorOptions::builder().build());
        assert_eq!(dedup.check_and_claim("def456", &history), CheckResult::New);
        assert_eq!(dedup.check_and_claim("def456", &history), CheckResult::DuplicateInTask);
    }

    #[tokio::test]
    async fn disabling_historical_check_ignores_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::load(temp_history_path(dir.path())).await;
        history.insert("abc123".to_owned());

        let dedup = Deduplicator::new(
            DeduplicatorOptions::builder().use_historical(false).build(),
        );
        assert_eq!(dedup.check_and_claim("abc123", &history), CheckResult::New);
    }

    #[tokio::test]
    async fn concurrent_claims_of_the_same_digest_yield_exactly_one_new_verdict() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::load(temp_history_path(dir.path())).await);
        let dedup = Arc::new(Deduplicator::new(DeduplicatorOptions::builder().build()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dedup = dedup.clone();
            let history = history.clone();
            handles.push(tokio::task::spawn_blocking(move || dedup.check_and_claim("shared-digest", &history)));
        }
        let mut new_count = 0;
        for handle in handles {
            if handle.await.unwrap() == CheckResult::New {
                new_count += 1;
            }
        }
        assert_eq!(new_count, 1, "exactly one concurrent claim of the same digest should win");
    }

    #[tokio::test]
    async fn flush_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_history_path(dir.path());
        let history = HistoryStore::load(path.clone()).await;
        history.insert("xyz789".to_owned());
        history.flush_if_dirty().await.unwrap();

        let reloaded = HistoryStore::load(path).await;
        assert!(reloaded.contains("xyz789"));
    }
}
