//! Application configuration structures.
//!
//! The option surface is broad (spec §6, §9 "Builder for config"), so each group of related
//! options gets its own small `typed_builder`-driven struct, the same staged-builder approach
//! the teacher uses for `archive::Options`/`vsi::scan::Options`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use freightline_transport::{Endpoint, Transport};
use typed_builder::TypedBuilder;

use crate::error::ConfigError;
use crate::model::{Failure, FileRef};
use crate::rules::RuleSpec;

const MIB: u64 = 1024 * 1024;

/// The remote protocol a [`TransportConfig`] targets.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Protocol {
    /// Plain FTP.
    Ftp,
    /// Explicit FTPS (`AUTH TLS`).
    Ftps,
    /// SFTP over SSH.
    Sftp,
}

/// Connection details for the remote upload target.
#[derive(Clone, Debug, TypedBuilder)]
pub struct TransportConfig {
    /// Which protocol to speak.
    pub protocol: Protocol,
    /// Remote host name or address.
    #[builder(setter(into))]
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Username to authenticate as.
    #[builder(setter(into))]
    pub username: String,
    /// Password (or passphrase) to authenticate with.
    #[builder(setter(into))]
    pub password: String,
    /// Base remote path new uploads are placed under.
    #[builder(setter(into))]
    pub remote_path: String,
    /// Whether transport is enabled at all; when false, packages are assembled but never
    /// uploaded and the history store is never updated from this run.
    #[builder(default = true)]
    pub enabled: bool,
    /// Attempts per upload before the package is handed to the retry queue.
    #[builder(default = 3)]
    pub retry_count: usize,
    /// Per-attempt timeout, in milliseconds.
    #[builder(default = 30_000)]
    pub timeout_ms: u64,

    /// Worker pool size for the transport stage.
    #[builder(default = 2)]
    pub concurrency: usize,
}

impl TransportConfig {
    /// The connection parameters shared with `freightline_transport`.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            remote_path: self.remote_path.clone(),
        }
    }
}

/// Sealing thresholds for the packager (C7).
#[derive(Clone, Copy, Debug, TypedBuilder)]
pub struct PackagingTrigger {
    /// Seal once a package holds this many files.
    #[builder(default = 500)]
    pub max_files: usize,
    /// Seal once a package's accumulated byte size reaches this many MiB.
    #[builder(default = 2048)]
    pub max_size_mib: u64,
}

impl PackagingTrigger {
    /// The size threshold in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mib * MIB
    }
}

/// Per-profile parameters controlling the stability checker (C4).
#[derive(Clone, Copy, Debug, TypedBuilder)]
pub struct StabilityProfile {
    /// Non-stable attempts tolerated before `waitForStability` gives up.
    #[builder(default = 5)]
    pub max_retries: usize,
    /// Delay between `waitForStability` attempts, in milliseconds.
    #[builder(default = 1_000)]
    pub retry_interval_ms: u64,
    /// Spacing between the two stat samples used for large-file POSIX stability checks, in
    /// milliseconds.
    #[builder(default = 200)]
    pub check_interval_ms: u64,
    /// Files above this size (bytes) use the platform large-file stability path.
    #[builder(default = 50 * MIB)]
    pub large_file_threshold: u64,
    /// Whether to use the large-file path at all for files above the threshold.
    #[builder(default = true)]
    pub skip_read_for_large_files: bool,
}

/// Worker pool sizes and retry parameters for the pipeline coordinator (C9).
#[derive(Clone, Copy, Debug, TypedBuilder)]
pub struct QueueConfig {
    /// Concurrency for the file-stability stage.
    #[builder(default = 5)]
    pub file_stability_concurrency: usize,
    /// Concurrency for the archive-stability stage.
    #[builder(default = 3)]
    pub archive_stability_concurrency: usize,
    /// Concurrency for the hash stage.
    #[builder(default = 5)]
    pub hash_concurrency: usize,
    /// How long the retry loop sleeps between sweeps, in milliseconds.
    #[builder(default = 5_000)]
    pub retry_delay_ms: u64,
    /// Maximum number of coordinator-level retries before an item is terminally failed.
    #[builder(default = 3)]
    pub max_retries: usize,
}

/// Deduplication behaviour (C6).
#[derive(Clone, Debug, TypedBuilder)]
pub struct DeduplicatorOptions {
    /// Whether deduplication runs at all.
    #[builder(default = true)]
    pub enabled: bool,
    /// Whether to suppress files whose digest is in the persisted history set.
    #[builder(default = true)]
    pub use_historical: bool,
    /// Whether to suppress files whose digest has already been seen earlier in this run.
    #[builder(default = true)]
    pub use_task: bool,
    /// Where the history set is persisted between runs.
    #[builder(default = PathBuf::from("./historical-uploads.json"), setter(into))]
    pub history_file_path: PathBuf,
    /// How often the dirty history set is flushed to disk, in milliseconds.
    #[builder(default = 5 * 60 * 1000)]
    pub auto_save_interval_ms: u64,
}

/// A callback invoked with the current progress snapshot, and the newly matched file when the
/// event was a match. Must not block: it runs on the coordinator's own task.
pub type ProgressCallback = Arc<dyn Fn(crate::events::Progress, Option<FileRef>) + Send + Sync>;

/// A callback invoked with each newly recorded failure. Must not block.
pub type FailureCallback = Arc<dyn Fn(Failure) + Send + Sync>;

/// Constructs a fresh, unconnected transport instance. Called once per transport worker.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Top-level configuration for [`crate::pipeline::scan_and_transport`].
#[derive(TypedBuilder)]
pub struct PipelineConfig {
    /// One or more source roots to scan.
    pub root_dirs: Vec<PathBuf>,
    /// Match rules; a file must satisfy at least one to be considered.
    pub rules: Vec<RuleSpec>,
    /// The remote upload target.
    pub transport: TransportConfig,
    /// Constructs the concrete `Transport` implementation matching `transport.protocol`.
    pub transport_factory: TransportFactory,
    /// External task correlator.
    #[builder(setter(into))]
    pub task_id: String,

    /// Local scratch directory for assembled packages.
    #[builder(default = PathBuf::from("./temp/packages"), setter(into))]
    pub output_dir: PathBuf,
    /// Where the `<taskId>-<scanId>.json` result document lands.
    #[builder(default = PathBuf::from("./results"), setter(into))]
    pub results_dir: PathBuf,
    /// Where the run's plain-text log is written; uploaded alongside the result document at
    /// end-of-run if transport is enabled.
    #[builder(default = PathBuf::from(format!("./scan_transport_log_{}.log", Utc::now().timestamp_millis())), setter(into))]
    pub log_file_path: PathBuf,
    /// Substitution pattern for package file names; supports `{taskId}`, `{scanId}`, `{index}`,
    /// `{date}`.
    #[builder(default = String::from("package_{taskId}_{index}"), setter(into))]
    pub package_name_pattern: String,
    /// Per-file size cap, in bytes; files over this become `ignoredLargeFile` failures.
    #[builder(default = 500 * MIB)]
    pub max_file_size: u64,
    /// Directory names/paths to skip during traversal.
    #[builder(default)]
    pub skip_dirs: Vec<String>,
    /// Traversal depth cap; -1 means unlimited.
    #[builder(default = -1)]
    pub depth: i64,
    /// Whether to recurse into archives nested inside archives.
    #[builder(default = true)]
    pub scan_nested_archives: bool,
    /// Recursion cap for nested archives.
    #[builder(default = 5)]
    pub max_nested_level: usize,
    /// Packager sealing thresholds.
    #[builder(default = PackagingTrigger::builder().build())]
    pub packaging_trigger: PackagingTrigger,
    /// Whether to compute content digests (and therefore run deduplication) at all.
    #[builder(default = true)]
    pub calculate_digest: bool,
    /// Whether to emit `manifest.json` inside each package.
    #[builder(default = true)]
    pub emit_manifest: bool,
    /// Worker pool sizes and retry parameters.
    #[builder(default = QueueConfig::builder().build())]
    pub queue: QueueConfig,
    /// Stability-check parameters.
    #[builder(default = StabilityProfile::builder().build())]
    pub stability: StabilityProfile,
    /// Deduplication behaviour.
    #[builder(default = DeduplicatorOptions::builder().build())]
    pub dedup: DeduplicatorOptions,

    /// Progress event callback.
    #[builder(default, setter(strip_option))]
    pub on_progress: Option<ProgressCallback>,
    /// Failure event callback.
    #[builder(default, setter(strip_option))]
    pub on_failure: Option<FailureCallback>,
}

impl PipelineConfig {
    /// Validate configuration that must be checked before the pipeline starts; failures here
    /// are fatal per spec §7, unlike anything encountered once the run is underway.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_dirs.is_empty() {
            return Err(ConfigError::NoRootDirs);
        }
        if self.rules.is_empty() {
            return Err(ConfigError::NoRules);
        }
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ConfigError::OutputDirUnusable {
            path: self.output_dir.clone(),
            source,
        })?;
        std::fs::create_dir_all(&self.results_dir).map_err(|source| ConfigError::ResultsDirUnusable {
            path: self.results_dir.clone(),
            source,
        })?;
        Ok(())
    }
}
