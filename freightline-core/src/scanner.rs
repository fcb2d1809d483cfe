//! Directory and archive discovery (C3).
//!
//! Grounded on `archive::walk::walk_inner`'s "background thread streams results over a channel"
//! shape, generalized so the same idea drives the top-level filesystem walk: the whole scan runs
//! on a blocking thread (via `spawn_blocking`) and reports matches, progress, and failures
//! through the async handles the coordinator gave it, instead of blocking the tokio runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::Sender;
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::events::EventSink;
use crate::model::{FailureKind, FileRef};
use crate::rules::RuleSet;

/// Run a full scan of `config.root_dirs`, sending matched filesystem files to `tx_fs` and
/// matched archive entries to `tx_archive`. Runs to completion on a blocking thread; the
/// returned future resolves once every root has been fully walked.
pub async fn scan(
    config: Arc<PipelineConfig>,
    rules: Arc<RuleSet>,
    sink: Arc<EventSink>,
    scratch_root: PathBuf,
    tx_fs: Sender<FileRef>,
    tx_archive: Sender<FileRef>,
) {
    tokio::task::spawn_blocking(move || {
        for root in &config.root_dirs {
            walk_root(&config, &rules, &sink, &scratch_root, root, &tx_fs, &tx_archive);
        }
    })
    .await
    .expect("scanner task panicked");
}

fn walk_root(
    config: &PipelineConfig,
    rules: &RuleSet,
    sink: &EventSink,
    scratch_root: &Path,
    root: &Path,
    tx_fs: &Sender<FileRef>,
    tx_archive: &Sender<FileRef>,
) {
    let max_depth = if config.depth < 0 {
        usize::MAX
    } else {
        config.depth as usize
    };

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry.path(), config));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                sink.failure(crate::model::Failure::new(
                    FailureKind::DirectoryAccess,
                    path,
                    None,
                    err.to_string(),
                    None,
                ));
                continue;
            }
        };

        if entry.file_type().is_dir() {
            sink.scanned_dir();
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        sink.scanned_file();
        let path = entry.path().to_path_buf();

        if config.scan_nested_archives && freightline_archive::recognised_extension(&path) {
            handle_archive(config, rules, sink, scratch_root, &path, tx_archive);
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !rules.matches(name) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                sink.failure(crate::model::Failure::new(
                    FailureKind::FileStat,
                    path.clone(),
                    None,
                    err.to_string(),
                    None,
                ));
                continue;
            }
        };

        if meta.len() > config.max_file_size {
            sink.failure(crate::model::Failure::new(
                FailureKind::IgnoredLargeFile,
                path.clone(),
                None,
                format!("{} bytes exceeds the configured {} byte cap", meta.len(), config.max_file_size),
                None,
            ));
            continue;
        }

        let file = FileRef::filesystem(
            path,
            meta.len(),
            meta.created().ok().map(system_time_to_utc),
            meta.modified().ok().map(system_time_to_utc),
        );
        sink.matched(&file);
        if tx_fs.blocking_send(file).is_err() {
            return;
        }
    }
}

fn handle_archive(
    config: &PipelineConfig,
    rules: &RuleSet,
    sink: &EventSink,
    scratch_root: &Path,
    archive_path: &Path,
    tx_archive: &Sender<FileRef>,
) {
    sink.archive_scanned();
    let archive_id = format!("{:x}", md5_like_id(archive_path));
    let mut seen_first_entry_at_nesting = 0usize;

    for item in freightline_archive::walk(archive_path.to_path_buf(), config.max_nested_level) {
        match item {
            Ok(entry) => {
                if entry.nesting() > seen_first_entry_at_nesting {
                    seen_first_entry_at_nesting = entry.nesting();
                    if entry.nesting() > 1 {
                        sink.nested_archive_scanned(entry.nesting());
                    }
                }

                let Some(name) = entry.internal_path().file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !rules.matches(name) {
                    continue;
                }
                if entry.size() > config.max_file_size {
                    sink.failure(crate::model::Failure::new(
                        FailureKind::IgnoredLargeFile,
                        archive_path.to_path_buf(),
                        Some(entry.internal_path().to_path_buf()),
                        format!("{} bytes exceeds the configured {} byte cap", entry.size(), config.max_file_size),
                        Some(entry.nesting()),
                    ));
                    continue;
                }

                let content_path = match persist_scratch_copy(scratch_root, &archive_id, entry.concrete_path()) {
                    Ok(p) => p,
                    Err(err) => {
                        sink.failure(crate::model::Failure::new(
                            FailureKind::ArchiveEntry,
                            archive_path.to_path_buf(),
                            Some(entry.internal_path().to_path_buf()),
                            err.to_string(),
                            Some(entry.nesting()),
                        ));
                        continue;
                    }
                };

                let file = FileRef::archive_entry(
                    archive_path.to_path_buf(),
                    entry.internal_path().to_path_buf(),
                    content_path,
                    entry.nesting(),
                    entry.size(),
                    entry.modified().map(system_time_to_utc),
                );
                sink.matched(&file);
                if tx_archive.blocking_send(file).is_err() {
                    return;
                }
            }
            Err(freightline_archive::Error::RecursionLimit { level, max }) => {
                sink.failure(crate::model::Failure::new(
                    FailureKind::NestedArchive,
                    archive_path.to_path_buf(),
                    None,
                    format!("nesting level {level} exceeds configured maximum {max}"),
                    Some(level),
                ));
            }
            Err(err) => {
                sink.failure(crate::model::Failure::new(
                    FailureKind::ArchiveOpen,
                    archive_path.to_path_buf(),
                    None,
                    err.to_string(),
                    None,
                ));
            }
        }
    }
}

/// Copy an archive entry's scratch-extracted bytes into a scratch directory owned by this run,
/// so the copy outlives `archive::walk`'s own scratch directory (which is torn down as soon as
/// the last `Entry` sharing it is dropped, i.e. as soon as enumeration moves past it).
fn persist_scratch_copy(scratch_root: &Path, archive_id: &str, source: &Path) -> std::io::Result<PathBuf> {
    let dir = scratch_root.join(archive_id);
    std::fs::create_dir_all(&dir)?;
    let unique_name = format!(
        "{:x}-{}",
        md5_like_id(source),
        source.file_name().and_then(|n| n.to_str()).unwrap_or("entry")
    );
    let dest = dir.join(unique_name);
    std::fs::copy(source, &dest)?;
    Ok(dest)
}

/// Whether traversal should not descend into `path`: it names a configured `skipDirs` entry,
/// or it is (or is inside) this run's own package output directory, which would otherwise let
/// a scan re-discover and re-package the packages it just wrote.
fn is_skipped(path: &Path, config: &PipelineConfig) -> bool {
    let name_matches = config.skip_dirs.iter().any(|skip| {
        path.file_name()
            .map(|n| n.to_string_lossy() == skip.as_str())
            .unwrap_or(false)
    });
    name_matches || path.starts_with(&config.output_dir)
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// A cheap, non-cryptographic path fingerprint used only to namespace scratch directories and
/// file names; collisions are harmless (just a name clash resolved by overwrite) since these
/// files are never compared for identity.
fn md5_like_id(path: &Path) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSpec;

    fn config(root: PathBuf) -> PipelineConfig {
        PipelineConfig::builder()
            .root_dirs(vec![root])
            .rules(vec![RuleSpec {
                extensions: vec!["txt".to_owned()],
                name_pattern: ".*".to_owned(),
            }])
            .transport(
                crate::config::TransportConfig::builder()
                    .protocol(crate::config::Protocol::Ftp)
                    .host("localhost")
                    .port(21)
                    .username("u")
                    .password("p")
                    .remote_path("/")
                    .build(),
            )
            .transport_factory(Arc::new(|| unimplemented!("not exercised in this test")))
            .task_id("task")
            .build()
    }

    #[tokio::test]
    async fn matches_plain_files_and_skips_non_matching_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"hello").unwrap();

        let config = Arc::new(config(dir.path().to_owned()));
        let rules = Arc::new(RuleSet::compile(&config.rules).unwrap());
        let sink = Arc::new(EventSink::new(None, None));
        let scratch = tempfile::tempdir().unwrap();
        let (tx_fs, mut rx_fs) = tokio::sync::mpsc::channel(8);
        let (tx_archive, _rx_archive) = tokio::sync::mpsc::channel(8);

        scan(config, rules, sink, scratch.path().to_owned(), tx_fs, tx_archive).await;

        let mut matched = Vec::new();
        while let Ok(file) = rx_fs.try_recv() {
            matched.push(file);
        }
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].display_name(), "a.txt");
    }

    #[tokio::test]
    async fn skip_dirs_are_not_descended_into() {
        let dir = tempfile::tempdir().unwrap();
        let skipped = dir.path().join("node_modules");
        std::fs::create_dir(&skipped).unwrap();
        std::fs::write(skipped.join("a.txt"), b"hello").unwrap();

        let mut config = config(dir.path().to_owned());
        config.skip_dirs = vec!["node_modules".to_owned()];
        let config = Arc::new(config);
        let rules = Arc::new(RuleSet::compile(&config.rules).unwrap());
        let sink = Arc::new(EventSink::new(None, None));
        let scratch = tempfile::tempdir().unwrap();
        let (tx_fs, mut rx_fs) = tokio::sync::mpsc::channel(8);
        let (tx_archive, _rx_archive) = tokio::sync::mpsc::channel(8);

        scan(config, rules, sink, scratch.path().to_owned(), tx_fs, tx_archive).await;
        assert!(rx_fs.try_recv().is_err());
    }
}
