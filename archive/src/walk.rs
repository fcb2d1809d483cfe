//! Iterator-based enumeration of a single archive's contents, recursing into nested archives.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::SystemTime,
};

use crossbeam_channel::{bounded, Sender};
use derivative::Derivative;
use walkdir::WalkDir;

use crate::{
    registry::{recognised_extension, Registry},
    Error,
};

/// A file discovered while enumerating an archive, possibly nested within other archives.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Entry {
    internal: PathBuf,
    concrete: PathBuf,
    nesting: usize,
    size: u64,
    modified: Option<SystemTime>,

    /// Keeps the scratch directory backing `concrete` alive for as long as this entry exists.
    #[derivative(Debug = "ignore")]
    _scratch: Arc<Scratch>,
}

impl Entry {
    /// Path of this entry relative to the root archive; archive boundaries crossed while
    /// recursing into nested archives are just additional path segments.
    pub fn internal_path(&self) -> &Path {
        &self.internal
    }

    /// Where the entry's bytes actually live on disk right now (a scratch extraction).
    /// Valid only until this `Entry` (and any clones sharing its scratch directory) are dropped.
    pub fn concrete_path(&self) -> &Path {
        &self.concrete
    }

    /// 1 for an entry directly inside the root archive, 2+ for one inside a nested archive.
    pub fn nesting(&self) -> usize {
        self.nesting
    }

    /// Size in bytes, as reported by the filesystem after extraction.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification time, as reported by the filesystem after extraction.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

struct Scratch {
    dir: PathBuf,
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// Enumerate every file entry inside `archive`, recursing into nested archives up to
/// `max_nesting` additional levels deep (a nested archive found at nesting level `n` where
/// `n > max_nesting` is reported as [`Error::RecursionLimit`] and not expanded further).
///
/// A background thread extracts archives as they're discovered and streams entries back over
/// a channel, so the walk can begin before the whole tree is materialized on disk. An error
/// opening or extracting the *root* archive surfaces as the only item yielded by the iterator.
/// Errors extracting a *nested* archive are yielded inline and enumeration continues with the
/// nested archive's own entry (it is simply not recursed into further).
pub fn walk(archive: PathBuf, max_nesting: usize) -> impl Iterator<Item = Result<Entry, Error>> {
    let (tx, rx) = bounded(0);
    thread::spawn(move || walk_inner(tx, archive, max_nesting));
    rx.into_iter()
}

struct Frame {
    scratch: Arc<Scratch>,
    internal_prefix: PathBuf,
    nesting: usize,
}

fn walk_inner(tx: Sender<Result<Entry, Error>>, root: PathBuf, max_nesting: usize) {
    log::debug!("walking archive {root:?} (max_nesting={max_nesting})");
    let registry = Registry::default();

    let scratch = match registry.extract(&root) {
        Ok(dir) => Arc::new(Scratch { dir }),
        Err(err) => {
            let _ = tx.send(Err(err));
            return;
        }
    };

    let mut queue = VecDeque::from([Frame {
        scratch,
        internal_prefix: PathBuf::new(),
        nesting: 1,
    }]);

    while let Some(frame) = queue.pop_front() {
        for entry in WalkDir::new(&frame.scratch.dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    if tx.send(Err(err.into())).is_err() {
                        return;
                    }
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = match entry.path().strip_prefix(&frame.scratch.dir) {
                Ok(rel) => rel.to_owned(),
                Err(_) => continue,
            };
            let internal = frame.internal_prefix.join(&rel);

            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    if tx.send(Err(err.into())).is_err() {
                        return;
                    }
                    continue;
                }
            };

            let concrete = entry.path().to_owned();
            let looks_like_archive = recognised_extension(&concrete);

            let out = Entry {
                internal: internal.clone(),
                concrete: concrete.clone(),
                nesting: frame.nesting,
                size: meta.len(),
                modified: meta.modified().ok(),
                _scratch: frame.scratch.clone(),
            };
            if tx.send(Ok(out)).is_err() {
                return;
            }

            if !looks_like_archive {
                continue;
            }
            if frame.nesting > max_nesting {
                let _ = tx.send(Err(Error::RecursionLimit {
                    level: frame.nesting,
                    max: max_nesting,
                }));
                continue;
            }

            match registry.extract(&concrete) {
                // Extension looked archive-like but wasn't actually one; not an error, just a regular file.
                Err(Error::Unsupported { .. }) => continue,
                Err(err) => {
                    if tx.send(Err(err)).is_err() {
                        return;
                    }
                }
                Ok(dir) => queue.push_back(Frame {
                    scratch: Arc::new(Scratch { dir }),
                    internal_prefix: internal,
                    nesting: frame.nesting + 1,
                }),
            }
        }
    }
}
