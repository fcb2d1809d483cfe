use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors encountered while enumerating the contents of an archive.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The archive could not be identified or opened by any registered strategy.
    #[error("archive at {path:?} is not a supported format")]
    Unsupported {
        /// The archive that could not be identified.
        path: PathBuf,
    },

    /// Generic IO error while reading or extracting the archive.
    #[error("i/o error reading archive")]
    IO(#[from] io::Error),

    /// The underlying libarchive-backed extraction failed.
    #[error("libarchive extraction failed")]
    Libarchive(#[from] compress_tools::Error),

    /// Walking the extracted contents of an archive failed.
    #[error("walk extracted contents")]
    Walk(#[from] walkdir::Error),

    /// The recursion ceiling was reached; the nested archive was not expanded further.
    #[error("nesting level {level} exceeds configured maximum {max}")]
    RecursionLimit {
        /// The nesting level that was rejected.
        level: usize,
        /// The configured maximum nesting level.
        max: usize,
    },
}
