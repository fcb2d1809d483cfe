//! Bounded-concurrency ingest pipeline: discovery, stability, fingerprint, dedup, packaging, and
//! transport, wired together into one `scan_and_transport` entry point.
//!
//! `freightline_core` owns the data-flow invariants described by the project's pipeline design:
//! every matched file passes each stage at most once, a duplicate never reaches transport, and
//! every matched file terminates in exactly one of `processed`, `failed`, or `skipped-duplicate`.
//! Concrete archive decoding, hashing, and network transport are supplied by the
//! `freightline-archive`, `freightline-fingerprint`, and `freightline-transport` crates behind
//! this crate's abstract interfaces; this crate only consumes them.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
mod logfile;
pub mod model;
pub mod package;
mod persist;
pub mod pipeline;
pub mod result;
pub mod rules;
mod retry;
mod scanner;
mod stability;

pub use config::{
    DeduplicatorOptions, FailureCallback, PackagingTrigger, PipelineConfig, Protocol,
    ProgressCallback, QueueConfig, StabilityProfile, TransportConfig, TransportFactory,
};
pub use error::ConfigError;
pub use events::{Progress, Stage, StageSnapshot};
pub use model::{Failure, FailureKind, FileRef, Origin};
pub use package::{Manifest, ManifestEntry, Package, PackagingError};
pub use pipeline::scan_and_transport;
pub use result::{ProcessedFile, ScanResult, TransportRecord};
pub use rules::{RuleSet, RuleSpec};
