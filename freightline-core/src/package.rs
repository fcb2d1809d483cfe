//! Packaging (C7): groups matched files into size/count-bounded zip archives.
//!
//! Grounded on `archive::registry::Libarchive`'s extraction path run in reverse — where that
//! module drives `compress_tools` to unpack an archive into a scratch directory, this one drives
//! the `zip` crate (already a dev-dependency of `archive`, used there to build fixture archives
//! for tests) to pack a scratch directory's worth of matched files back into one.

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::config::PackagingTrigger;
use crate::events::EventSink;
use crate::model::{FailureKind, FileRef};

/// One file's record inside a package's manifest.
#[derive(Clone, Debug, Serialize)]
pub struct ManifestEntry {
    /// The name this file was stored under inside the package archive.
    pub entry_name: String,
    /// The file's own base name before any collision-driven rename (`display_name()`).
    pub original_name: String,
    /// The original location the file was found at (archive-relative for archive entries).
    pub original_path: String,
    /// Size in bytes.
    pub size: u64,
    /// Content digest, if digests were computed.
    pub digest: Option<String>,
    /// Archive nesting level the file was found at (0 for plain filesystem files).
    pub nesting_level: usize,
}

/// The manifest embedded in every package (unless `emitManifest` is disabled).
#[derive(Clone, Debug, Serialize)]
pub struct Manifest {
    /// `"pkg_<timestamp>_<random>"`, unique per sealed package.
    pub package_id: String,
    /// The external task correlator this run was invoked with.
    pub task_id: String,
    /// This run's internally generated scan correlator.
    pub scan_id: String,
    /// 1-based index of this package within the run.
    pub package_index: usize,
    /// When this package was sealed.
    pub created_at: chrono::DateTime<Utc>,
    /// One entry per successfully packaged file.
    pub entries: Vec<ManifestEntry>,
    /// Per-member failures that occurred while assembling this package (spec §4.7 step 5); the
    /// package still seals and uploads despite these.
    pub errors: Vec<String>,
    /// Non-fatal notes about this package (e.g. name-collision renames, or "no files matched").
    pub warnings: Vec<String>,
}

/// A sealed package: a zip archive on disk plus the members it contains.
pub struct Package {
    /// Path of the assembled zip archive.
    pub path: PathBuf,
    /// 1-based index of this package within the run.
    pub index: usize,
    /// The `FileRef`s successfully included in this package (excludes any member whose copy
    /// failed during assembly; those are reported as `Failure(Packaging)` instead).
    pub member_refs: Vec<FileRef>,
    /// The manifest describing `member_refs`, whether or not it was embedded in the archive.
    pub manifest: Manifest,
}

/// Failure assembling a package.
#[derive(Debug, Error)]
pub enum PackagingError {
    /// The zip archive itself could not be created or finalized.
    #[error("failed to write package archive {path:?}: {source}")]
    Archive {
        /// Path of the archive that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

struct PendingMember {
    file: FileRef,
    entry_name: String,
}

/// Accumulates matched files and seals them into [`Package`]s once a size or count trigger is
/// reached.
pub struct Packager {
    task_id: String,
    output_dir: PathBuf,
    name_pattern: String,
    trigger: PackagingTrigger,
    emit_manifest: bool,
    sink: Arc<EventSink>,
    next_index: usize,
    pending: Vec<PendingMember>,
    pending_size: u64,
    used_names: HashSet<String>,
    collision_warnings: Vec<String>,
}

impl Packager {
    /// Construct an empty packager for one run.
    pub fn new(
        task_id: String,
        output_dir: PathBuf,
        name_pattern: String,
        trigger: PackagingTrigger,
        emit_manifest: bool,
        sink: Arc<EventSink>,
    ) -> Self {
        Self {
            task_id,
            output_dir,
            name_pattern,
            trigger,
            emit_manifest,
            sink,
            next_index: 1,
            pending: Vec::new(),
            pending_size: 0,
            used_names: HashSet::new(),
            collision_warnings: Vec::new(),
        }
    }

    /// Add a file to the pending package, assigning it a collision-free entry name. Returns
    /// `true` once either sealing trigger has been reached, signalling the caller should call
    /// [`Packager::seal`].
    pub fn add(&mut self, mut file: FileRef) -> bool {
        let original = file.display_name().to_owned();
        let entry_name = self.resolve_entry_name(&original);
        if entry_name != original {
            self.collision_warnings.push(format!(
                "name conflict: \"{original}\" (target \"{original}\") renamed to \"{entry_name}\""
            ));
        }
        file.set_package_entry_name(entry_name.clone());
        self.pending_size += file.size();
        self.pending.push(PendingMember { file, entry_name });

        self.pending.len() >= self.trigger.max_files || self.pending_size >= self.trigger.max_size_bytes()
    }

    /// Whether there is anything waiting to be sealed.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn resolve_entry_name(&mut self, display_name: &str) -> String {
        if self.used_names.insert(display_name.to_owned()) {
            return display_name.to_owned();
        }
        let (stem, ext) = split_extension(display_name);
        let mut n = 1;
        loop {
            let candidate = match &ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            };
            if self.used_names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Seal the currently pending members into a package, if any are pending. Returns `None`
    /// for an empty pending set rather than producing a spurious empty package — the
    /// end-of-scan coordinator path uses this so a run that matched nothing emits zero
    /// packages (spec §8, "empty roots").
    pub async fn seal(&mut self, scan_id: &str) -> Result<Option<Package>, PackagingError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        self.seal_always(scan_id, Vec::new()).await.map(Some)
    }

    /// Seal the currently pending members into a package unconditionally, producing a
    /// manifest-only package with a warning when nothing is pending. Used by the standalone
    /// packaging entry point (spec §8's "empty input still yields a package").
    pub async fn force_seal(&mut self, scan_id: &str) -> Result<Package, PackagingError> {
        let warnings = if self.pending.is_empty() {
            vec!["no files were available to package".to_owned()]
        } else {
            Vec::new()
        };
        self.seal_always(scan_id, warnings).await
    }

    async fn seal_always(
        &mut self,
        scan_id: &str,
        mut warnings: Vec<String>,
    ) -> Result<Package, PackagingError> {
        let index = self.next_index;
        self.next_index += 1;

        let members = std::mem::take(&mut self.pending);
        self.pending_size = 0;
        self.used_names.clear();
        warnings.append(&mut self.collision_warnings);

        let name = render_name(&self.name_pattern, &self.task_id, scan_id, index);
        let path = self.output_dir.join(format!("{name}.zip"));

        let sources: Vec<(PathBuf, String)> = members
            .iter()
            .map(|m| (m.file.content_path().clone(), m.entry_name.clone()))
            .collect();

        // The manifest is finalized below, once we know which members actually copied in; the
        // zip is written first so failures can be excluded rather than aborting the whole seal.
        let write_path = path.clone();
        let write_result = tokio::task::spawn_blocking(move || write_zip(&write_path, &sources))
            .await
            .expect("zip-writing task panicked")
            .map_err(|source| PackagingError::Archive { path: path.clone(), source })?;

        let failed_entry_names: HashSet<String> = write_result.failed.into_iter().collect();
        let mut errors = Vec::new();
        let mut member_refs = Vec::with_capacity(members.len());
        let mut entries = Vec::with_capacity(members.len());

        for m in members {
            if failed_entry_names.contains(&m.entry_name) {
                let message = format!("failed to copy \"{}\" into package", m.entry_name);
                self.sink.failure(crate::model::Failure::new(
                    FailureKind::Packaging,
                    m.file.source_path().clone(),
                    m.file.internal_path().map(Path::to_path_buf),
                    message.clone(),
                    Some(m.file.nesting_level()),
                ));
                errors.push(message);
                continue;
            }
            entries.push(ManifestEntry {
                entry_name: m.entry_name.clone(),
                original_name: m.file.display_name().to_owned(),
                original_path: m.file.identity_path().to_string_lossy().into_owned(),
                size: m.file.size(),
                digest: m.file.digest().map(|d| d.to_owned()),
                nesting_level: m.file.nesting_level(),
            });
            member_refs.push(m.file);
        }

        let manifest = Manifest {
            package_id: format!("pkg_{}_{:x}", Utc::now().timestamp_millis(), rand::random::<u32>()),
            task_id: self.task_id.clone(),
            scan_id: scan_id.to_owned(),
            package_index: index,
            created_at: Utc::now(),
            entries,
            errors,
            warnings,
        };

        if self.emit_manifest {
            let manifest_json =
                serde_json::to_vec_pretty(&manifest).expect("manifest serializes infallibly");
            let append_path = path.clone();
            tokio::task::spawn_blocking(move || append_manifest(&append_path, &manifest_json))
                .await
                .expect("manifest-append task panicked")
                .map_err(|source| PackagingError::Archive { path: path.clone(), source })?;
        }

        Ok(Package {
            path,
            index,
            member_refs,
            manifest,
        })
    }
}

struct WriteOutcome {
    /// Entry names whose source file could not be opened or copied.
    failed: Vec<String>,
}

fn write_zip(path: &std::path::Path, sources: &[(PathBuf, String)]) -> std::io::Result<WriteOutcome> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut failed = Vec::new();
    for (source, entry_name) in sources {
        let copied = (|| -> std::io::Result<()> {
            zip.start_file(entry_name, options)?;
            let mut reader = std::fs::File::open(source)?;
            std::io::copy(&mut reader, &mut zip)?;
            Ok(())
        })();
        if copied.is_err() {
            failed.push(entry_name.clone());
        }
    }

    zip.finish()?;
    Ok(WriteOutcome { failed })
}

/// Re-open a just-written zip to append `manifest.json`. Done as a second pass (rather than
/// threading the manifest bytes through `write_zip`) because the manifest itself records which
/// members failed, which is only known once `write_zip` has run.
fn append_manifest(path: &std::path::Path, manifest_json: &[u8]) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
    let mut zip = zip::ZipWriter::new_append(file)?;
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("manifest.json", options)?;
    zip.write_all(manifest_json)?;
    zip.finish()?;
    Ok(())
}

fn split_extension(name: &str) -> (String, Option<String>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_owned(), Some(ext.to_owned())),
        _ => (name.to_owned(), None),
    }
}

fn render_name(pattern: &str, task_id: &str, scan_id: &str, index: usize) -> String {
    let date = Utc::now().format("%Y%m%d").to_string();
    let mut substitutions = HashMap::new();
    substitutions.insert("{taskId}", task_id.to_owned());
    substitutions.insert("{scanId}", scan_id.to_owned());
    substitutions.insert("{index}", index.to_string());
    substitutions.insert("{date}", date);

    let mut out = pattern.to_owned();
    for (token, value) in substitutions {
        out = out.replace(token, &value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> FileRef {
        FileRef::filesystem(PathBuf::from(name), size, None, None)
    }

    fn test_sink() -> Arc<EventSink> {
        Arc::new(EventSink::new(None, None))
    }

    #[test]
    fn name_collisions_get_a_numeric_suffix() {
        let mut packager = Packager::new(
            "task".to_owned(),
            PathBuf::from("/tmp"),
            "{taskId}".to_owned(),
            PackagingTrigger::builder().build(),
            true,
            test_sink(),
        );
        assert!(!packager.add(file("report.txt", 10)));
        assert!(!packager.add(file("report.txt", 10)));
        assert_eq!(packager.pending[0].entry_name, "report.txt");
        assert_eq!(packager.pending[1].entry_name, "report-1.txt");
    }

    #[test]
    fn max_files_trigger_fires_at_the_configured_count() {
        let mut packager = Packager::new(
            "task".to_owned(),
            PathBuf::from("/tmp"),
            "{taskId}".to_owned(),
            PackagingTrigger::builder().max_files(2).build(),
            true,
            test_sink(),
        );
        assert!(!packager.add(file("a.txt", 1)));
        assert!(packager.add(file("b.txt", 1)));
    }

    #[tokio::test]
    async fn sealing_an_empty_packager_returns_none() {
        let mut packager = Packager::new(
            "task".to_owned(),
            PathBuf::from("/tmp"),
            "{taskId}".to_owned(),
            PackagingTrigger::builder().build(),
            true,
            test_sink(),
        );
        assert!(packager.seal("scan-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn force_seal_produces_a_manifest_only_package_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut packager = Packager::new(
            "task".to_owned(),
            dir.path().to_owned(),
            "{taskId}".to_owned(),
            PackagingTrigger::builder().build(),
            true,
            test_sink(),
        );
        let package = packager.force_seal("scan-1").await.unwrap();
        assert!(package.member_refs.is_empty());
        assert_eq!(package.manifest.warnings.len(), 1);
        assert!(package.path.exists());
    }

    #[tokio::test]
    async fn sealing_writes_a_real_zip_with_members_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"hello world").unwrap();

        let mut packager = Packager::new(
            "task".to_owned(),
            dir.path().join("out"),
            "{taskId}_{index}".to_owned(),
            PackagingTrigger::builder().build(),
            true,
            test_sink(),
        );
        packager.add(FileRef::filesystem(source, 11, None, None));
        let package = packager.seal("scan-1").await.unwrap().unwrap();

        assert_eq!(package.member_refs.len(), 1);
        let bytes = std::fs::read(&package.path).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert!(archive.len() >= 2);
    }
}
