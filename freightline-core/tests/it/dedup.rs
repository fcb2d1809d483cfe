//! S1: a file seen twice within one run is packaged once. S2: a file already recorded in a
//! persisted history store is suppressed even on its first appearance in a fresh run.

use std::fs;

use tempfile::tempdir;

use crate::{base_config, run};

#[tokio::test]
async fn duplicate_file_within_one_run_is_packaged_only_once() {
    let root = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let scratch = tempdir().unwrap();

    fs::write(root.path().join("a.txt"), b"same bytes").unwrap();
    fs::write(root.path().join("b.txt"), b"same bytes").unwrap();
    fs::write(root.path().join("c.txt"), b"different bytes").unwrap();

    let config = base_config(root.path().to_owned(), dest.path().to_owned(), scratch.path(), "task-dedup-1");
    let result = run(config).await;

    assert!(result.success, "failures: {:?}", result.failed_items);
    assert_eq!(result.processed_files.len(), 2, "one of the two identical files must be suppressed");
    assert_eq!(result.skipped_task_duplicates.len(), 1);
    assert!(result.skipped_historical_duplicates.is_empty());
}

#[tokio::test]
async fn file_already_in_history_store_is_suppressed_on_a_fresh_run() {
    let root = tempdir().unwrap();
    let dest = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let history_file = scratch.path().join("history.json");

    fs::write(root.path().join("seen-before.txt"), b"already uploaded").unwrap();
    fs::write(root.path().join("new.txt"), b"never uploaded").unwrap();

    let mut config = base_config(root.path().to_owned(), dest.path().to_owned(), scratch.path(), "task-dedup-2a");
    config.dedup.history_file_path = history_file.clone();
    let first = run(config).await;
    assert!(first.success, "failures: {:?}", first.failed_items);
    assert_eq!(first.processed_files.len(), 2);

    // A second run against the same history file, over the same root, must suppress both files
    // since their digests are now historical.
    let scratch2 = tempdir().unwrap();
    let mut config2 = base_config(root.path().to_owned(), dest.path().to_owned(), scratch2.path(), "task-dedup-2b");
    config2.dedup.history_file_path = history_file;
    let second = run(config2).await;

    assert!(second.success, "failures: {:?}", second.failed_items);
    assert!(second.processed_files.is_empty());
    assert_eq!(second.skipped_historical_duplicates.len(), 2);
}
