//! Fatal, configuration-time errors.
//!
//! Per spec §7, nothing is fatal to a run except a configuration error raised before the
//! pipeline starts; everything encountered once the pipeline is running becomes a [`crate::model::Failure`]
//! instead.

use std::path::PathBuf;

use thiserror::Error;

/// An error that prevents a run from starting at all.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A match rule's name pattern was not a valid regular expression.
    #[error("rule name pattern {pattern:?} is not a valid regular expression")]
    InvalidRule {
        /// The offending pattern.
        pattern: String,
        /// The underlying regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// The results directory could not be created or is not writable.
    #[error("results directory {path:?} is not usable: {source}")]
    ResultsDirUnusable {
        /// The configured results directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The package output directory could not be created or is not writable.
    #[error("output directory {path:?} is not usable: {source}")]
    OutputDirUnusable {
        /// The configured output directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be opened for appending.
    #[error("log file {path:?} is not usable: {source}")]
    LogFileUnusable {
        /// The configured log file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// No root directories were configured.
    #[error("at least one root directory must be configured")]
    NoRootDirs,

    /// No match rules were configured.
    #[error("at least one match rule must be configured")]
    NoRules,
}
