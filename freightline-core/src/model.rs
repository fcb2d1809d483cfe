//! The core data types that flow through the pipeline.
//!
//! A [`FileRef`] is the single handle passed between stages; every stage mutates only the
//! fields it owns (the single-owner rule from the spec) and otherwise treats it as immutable.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};

/// Where a matched file's bytes originate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// A plain file found by directory traversal.
    Filesystem,
    /// A file found inside an archive, possibly nested inside other archives.
    Archive {
        /// Canonical path of the (outermost) archive on disk.
        archive_path: PathBuf,
        /// Path of the entry relative to the root archive.
        internal_path: PathBuf,
    },
}

/// A handle to a single matched file, threaded through every pipeline stage.
///
/// `nesting_level == 0` iff `origin == Filesystem`; `archive_path`/`internal_path` are only
/// present when `origin` is `Archive`. Both invariants are enforced by the constructors below,
/// so a malformed `FileRef` cannot be built from outside this module.
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct FileRef {
    /// Where a directory-traversal stat reported this file; for archive entries this is the
    /// archive's own path, since the entry itself has no independent filesystem location.
    #[getset(get = "pub")]
    source_path: PathBuf,

    /// Where the bytes can actually be read right now: the original path for filesystem
    /// files, or a scratch-extracted copy for archive entries.
    #[getset(get = "pub")]
    content_path: PathBuf,

    #[getset(get = "pub")]
    display_name: String,

    #[getset(get_copy = "pub")]
    size: u64,

    #[getset(get_copy = "pub")]
    created: Option<DateTime<Utc>>,

    #[getset(get_copy = "pub")]
    modified: Option<DateTime<Utc>>,

    #[getset(get = "pub")]
    origin: Origin,

    #[getset(get_copy = "pub")]
    nesting_level: usize,

    package_entry_name: Option<String>,
    digest: Option<String>,

    #[getset(get = "pub")]
    metadata: HashMap<String, String>,
}

impl FileRef {
    /// Build a `FileRef` for a plain filesystem file.
    pub fn filesystem(
        path: PathBuf,
        size: u64,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        let display_name = file_name_string(&path);
        Self {
            content_path: path.clone(),
            source_path: path,
            display_name,
            size,
            created,
            modified,
            origin: Origin::Filesystem,
            nesting_level: 0,
            package_entry_name: None,
            digest: None,
            metadata: HashMap::new(),
        }
    }

    /// Build a `FileRef` for an entry discovered inside an archive.
    ///
    /// `content_path` must point at a scratch copy of the entry's bytes that outlives the
    /// archive's own extraction scratch directory, since the latter is torn down once
    /// enumeration of the archive completes.
    pub fn archive_entry(
        archive_path: PathBuf,
        internal_path: PathBuf,
        content_path: PathBuf,
        nesting_level: usize,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        assert!(
            nesting_level >= 1,
            "archive-origin FileRef must have nesting_level >= 1"
        );
        let display_name = file_name_string(&internal_path);
        Self {
            source_path: archive_path.clone(),
            content_path,
            display_name,
            size,
            created: None,
            modified,
            origin: Origin::Archive {
                archive_path,
                internal_path,
            },
            nesting_level,
            package_entry_name: None,
            digest: None,
            metadata: HashMap::new(),
        }
    }

    /// A stable identity key for this file, used as the membership key in stage queue state
    /// and as the round-trip correlator in the final result. For archive entries this combines
    /// the archive path and internal path, since two entries in different archives may share an
    /// internal path.
    pub fn identity_path(&self) -> PathBuf {
        match &self.origin {
            Origin::Filesystem => self.source_path.clone(),
            Origin::Archive {
                archive_path,
                internal_path,
            } => archive_path.join(internal_path),
        }
    }

    /// The path inside a containing archive, if this file came from one.
    pub fn internal_path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Filesystem => None,
            Origin::Archive { internal_path, .. } => Some(internal_path),
        }
    }

    /// The content digest, if one has been computed yet.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Record the content digest computed by the hasher. Only the hash stage calls this.
    pub fn set_digest(&mut self, digest: String) {
        self.digest = Some(digest);
    }

    /// The final name this file was assigned inside its package, if it has been packaged yet.
    pub fn package_entry_name(&self) -> Option<&str> {
        self.package_entry_name.as_deref()
    }

    /// Record the name assigned by the packager. Only the packager calls this.
    pub fn set_package_entry_name(&mut self, name: String) {
        self.package_entry_name = Some(name);
    }
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// The taxonomy of non-fatal errors the pipeline can encounter, per spec §3/§7.
///
/// Identifiers are stable strings (see [`FailureKind::as_str`]) since they are part of the
/// persisted result document's contract; no derive macro is allowed to silently rename one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A directory could not be read during traversal.
    DirectoryAccess,
    /// A file's metadata could not be read.
    FileStat,
    /// An archive could not be opened or its format was not recognised.
    ArchiveOpen,
    /// A single entry inside an otherwise-readable archive failed to enumerate.
    ArchiveEntry,
    /// A nested archive was found but could not be recursed into.
    NestedArchive,
    /// A matched file exceeded the configured size cap.
    IgnoredLargeFile,
    /// The stability checker could not confirm a filesystem file was quiescent.
    Stability,
    /// The stability checker could not confirm an archive-extracted file was readable.
    ArchiveStability,
    /// Hashing a file's contents failed.
    Hash,
    /// Assembling a file into its package failed.
    Packaging,
    /// Uploading a package to the transport endpoint failed.
    Transport,
    /// An unexpected error occurred inside a stage, outside the above categories.
    ScanError,
}

impl FailureKind {
    /// The stable string identifier for this kind, as used in spec.md §3.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::DirectoryAccess => "directoryAccess",
            FailureKind::FileStat => "fileStat",
            FailureKind::ArchiveOpen => "archiveOpen",
            FailureKind::ArchiveEntry => "archiveEntry",
            FailureKind::NestedArchive => "nestedArchive",
            FailureKind::IgnoredLargeFile => "ignoredLargeFile",
            FailureKind::Stability => "stability",
            FailureKind::ArchiveStability => "archiveStability",
            FailureKind::Hash => "hash",
            FailureKind::Packaging => "packaging",
            FailureKind::Transport => "transport",
            FailureKind::ScanError => "scanError",
        }
    }

    /// Whether this kind is eligible for the coordinator's retry queue (spec §7 recovery policy).
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Stability
                | FailureKind::ArchiveStability
                | FailureKind::Hash
                | FailureKind::Transport
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded failure. Failures are append-only: once recorded, never mutated.
#[derive(Clone, Debug, Getters, CopyGetters, serde::Serialize)]
pub struct Failure {
    #[getset(get_copy = "pub")]
    kind: FailureKind,
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get = "pub")]
    entry_path: Option<PathBuf>,
    #[getset(get = "pub")]
    error: String,
    #[getset(get_copy = "pub")]
    nesting_level: Option<usize>,
}

impl serde::Serialize for FailureKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl Failure {
    /// Construct a new failure record.
    pub fn new(
        kind: FailureKind,
        path: PathBuf,
        entry_path: Option<PathBuf>,
        error: String,
        nesting_level: Option<usize>,
    ) -> Self {
        Self {
            kind,
            path,
            entry_path,
            error,
            nesting_level,
        }
    }
}
