//! Command-line option structures, flattened into the [`Cmd`](crate::Cmd) parser the way
//! `vsi::config` flattens `Scan`/`Api`/`Display` into its own subcommands.

use std::path::PathBuf;

use clap::Parser;
use freightline_core::{DeduplicatorOptions, PackagingTrigger, Protocol, QueueConfig, RuleSpec};
use stable_eyre::{
    eyre::{bail, ensure},
    Result,
};

/// Roots to scan and the rules a file must satisfy to be matched.
#[derive(Parser, Debug)]
pub struct Scan {
    /// Whether to enable debug logging.
    #[clap(long, short)]
    pub debug: bool,

    /// One or more root directories to scan. At least one is required.
    #[clap(long = "root", required = true)]
    pub root_dirs: Vec<PathBuf>,

    /// A match rule, formatted as `ext1,ext2:pattern` (extensions are case-insensitive and the
    /// leading dot is optional; `pattern` is matched against the file's base name). Repeatable;
    /// a file matches if any rule's extension set and pattern both apply.
    #[clap(long = "rule", required = true)]
    pub rules: Vec<String>,

    /// Directory names/paths to skip during traversal (case-insensitive).
    #[clap(long = "skip-dir")]
    pub skip_dirs: Vec<String>,

    /// Traversal depth cap; -1 means unlimited.
    #[clap(long, default_value_t = -1)]
    pub depth: i64,

    /// Per-file size cap in MiB; files over this become `ignoredLargeFile` failures.
    #[clap(long, default_value_t = 500)]
    pub max_file_size_mib: u64,

    /// Do not recurse into archives nested inside archives.
    #[clap(long)]
    pub no_nested_archives: bool,

    /// Recursion cap for nested archives.
    #[clap(long, default_value_t = 5)]
    pub max_nested_level: usize,
}

impl Scan {
    /// Parse this struct's raw `--rule` strings into [`RuleSpec`]s.
    pub fn rule_specs(&self) -> Result<Vec<RuleSpec>> {
        self.rules.iter().map(|raw| parse_rule(raw)).collect()
    }
}

fn parse_rule(raw: &str) -> Result<RuleSpec> {
    let Some((extensions, pattern)) = raw.split_once(':') else {
        bail!("rule {raw:?} is not of the form `ext1,ext2:pattern`");
    };
    ensure!(!extensions.is_empty(), "rule {raw:?} has no extensions before the ':'");
    ensure!(!pattern.is_empty(), "rule {raw:?} has no pattern after the ':'");
    Ok(RuleSpec {
        extensions: extensions.split(',').map(ToOwned::to_owned).collect(),
        name_pattern: pattern.to_owned(),
    })
}

/// Which remote protocol the run targets, and how to reach it.
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum ProtocolArg {
    /// Plain FTP.
    Ftp,
    /// Explicit FTPS.
    Ftps,
    /// SFTP over SSH.
    Sftp,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Ftp => Protocol::Ftp,
            ProtocolArg::Ftps => Protocol::Ftps,
            ProtocolArg::Sftp => Protocol::Sftp,
        }
    }
}

/// The remote upload target.
#[derive(Parser, Debug)]
pub struct Transport {
    /// Which protocol to speak. Ignored when `--dry-run` copies to a local directory instead.
    #[clap(long, value_enum, default_value_t = ProtocolArg::Sftp)]
    pub protocol: ProtocolArg,

    /// Remote host name or address.
    #[clap(long, default_value = "")]
    pub host: String,

    /// Remote port.
    #[clap(long, default_value_t = 22)]
    pub port: u16,

    /// Username to authenticate as. Also available via `FREIGHTLINE_USERNAME`.
    #[clap(long, env = "FREIGHTLINE_USERNAME", default_value = "")]
    pub username: String,

    /// Password (or passphrase) to authenticate with. Also available via `FREIGHTLINE_PASSWORD`.
    #[clap(long, env = "FREIGHTLINE_PASSWORD", default_value = "")]
    pub password: String,

    /// Base remote path new uploads are placed under.
    #[clap(long, default_value = "/")]
    pub remote_path: String,

    /// Disable transport entirely: packages are assembled but never uploaded, and the history
    /// store is never updated from this run.
    #[clap(long)]
    pub no_transport: bool,

    /// Attempts per upload before the package is handed to the retry queue.
    #[clap(long, default_value_t = 3)]
    pub retry_count: usize,

    /// Per-attempt timeout, in milliseconds.
    #[clap(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Worker pool size for the transport stage.
    #[clap(long, default_value_t = 2)]
    pub concurrency: usize,

    /// Instead of speaking the configured protocol, copy packages into this local directory.
    /// Useful for smoke-testing a configuration without a real endpoint.
    #[clap(long)]
    pub dry_run_dir: Option<PathBuf>,
}

impl Transport {
    /// Validate that the fields required for a real (non-dry-run) transport are present.
    pub fn validate(self) -> Result<Self> {
        if !self.no_transport && self.dry_run_dir.is_none() {
            ensure!(!self.host.is_empty(), "--host is required unless --no-transport or --dry-run-dir is set");
            ensure!(!self.username.is_empty(), "--username is required unless --no-transport or --dry-run-dir is set");
        }
        Ok(self)
    }
}

/// Packaging and output destinations.
#[derive(Parser, Debug)]
pub struct Packaging {
    /// Local scratch directory for assembled packages.
    #[clap(long, default_value = "./temp/packages")]
    pub output_dir: PathBuf,

    /// Where the `<taskId>-<scanId>.json` result document lands.
    #[clap(long, default_value = "./results")]
    pub results_dir: PathBuf,

    /// Substitution pattern for package file names; supports `{taskId}`, `{scanId}`, `{index}`,
    /// `{date}`.
    #[clap(long, default_value = "package_{taskId}_{index}")]
    pub package_name_pattern: String,

    /// Seal a package once it holds this many files.
    #[clap(long, default_value_t = 500)]
    pub max_files: usize,

    /// Seal a package once its accumulated size reaches this many MiB.
    #[clap(long, default_value_t = 2048)]
    pub max_size_mib: u64,

    /// Disable `manifest.json` embedding in each package.
    #[clap(long)]
    pub no_manifest: bool,
}

impl Packaging {
    /// The [`PackagingTrigger`] this configuration describes.
    pub fn trigger(&self) -> PackagingTrigger {
        PackagingTrigger::builder()
            .max_files(self.max_files)
            .max_size_mib(self.max_size_mib)
            .build()
    }
}

/// Deduplication and queue concurrency.
#[derive(Parser, Debug)]
pub struct Dedup {
    /// Disable content hashing and deduplication entirely.
    #[clap(long)]
    pub no_digest: bool,

    /// Disable suppression of files already uploaded in a prior run.
    #[clap(long)]
    pub no_historical_dedup: bool,

    /// Disable suppression of files already seen earlier in this run.
    #[clap(long)]
    pub no_task_dedup: bool,

    /// Where the persisted cross-run digest history is stored.
    #[clap(long, default_value = "./historical-uploads.json")]
    pub history_file: PathBuf,

    /// Concurrency for the file-stability stage.
    #[clap(long, default_value_t = 5)]
    pub file_stability_concurrency: usize,

    /// Concurrency for the archive-stability stage.
    #[clap(long, default_value_t = 3)]
    pub archive_stability_concurrency: usize,

    /// Concurrency for the hash stage.
    #[clap(long, default_value_t = 5)]
    pub hash_concurrency: usize,

    /// Maximum coordinator-level retries before an item is terminally failed.
    #[clap(long, default_value_t = 3)]
    pub max_retries: usize,
}

impl Dedup {
    /// The [`DeduplicatorOptions`] this configuration describes.
    pub fn options(&self) -> DeduplicatorOptions {
        DeduplicatorOptions::builder()
            .enabled(!self.no_digest)
            .use_historical(!self.no_historical_dedup)
            .use_task(!self.no_task_dedup)
            .history_file_path(self.history_file.clone())
            .build()
    }

    /// The [`QueueConfig`] this configuration describes.
    pub fn queue(&self) -> QueueConfig {
        QueueConfig::builder()
            .file_stability_concurrency(self.file_stability_concurrency)
            .archive_stability_concurrency(self.archive_stability_concurrency)
            .hash_concurrency(self.hash_concurrency)
            .max_retries(self.max_retries)
            .build()
    }
}
