//! Content digests for files, streamed with a buffer size chosen by file size so that
//! hashing a multi-gigabyte file doesn't require holding it in memory at once.
//!
//! Fingerprints are opaque, deterministic hex strings: two files with the same fingerprint
//! are assumed to have identical contents. The digest algorithm (SHA-256) is fixed; there is
//! deliberately only one kind, unlike richer fingerprinting schemes, since the pipeline only
//! ever needs exact-content deduplication.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::{
    fmt::Display,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use derive_getters::Getters;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Errors encountered while hashing a file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A generic IO error occurred while reading the content to be hashed.
    #[error("i/o error hashing {path:?}: {source}")]
    IO {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// A SHA-256 content digest, rendered as a lowercase hex string.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Getters, Serialize, Deserialize)]
pub struct Digest {
    hex: String,
}

impl Digest {
    fn from_hasher(hasher: Sha256) -> Self {
        Self {
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// The digest rendered as a lowercase hex string.
    pub fn as_str(&self) -> &str {
        &self.hex
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Buffer size tiers chosen by input size, per the size bands used throughout this crate.
const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

fn buffer_size_for(size: u64) -> usize {
    match size {
        0 => 0,
        s if s < MIB => 64 * KIB as usize,
        s if s < 10 * MIB => MIB as usize,
        s if s < 100 * MIB => 2 * MIB as usize,
        _ => 4 * MIB as usize,
    }
}

/// Hash the file at `path`, choosing a buffer size based on its size.
///
/// Equivalent to [`hash_with_progress`] with a no-op progress callback.
pub fn hash(path: &Path) -> Result<Digest, Error> {
    hash_with_progress(path, |_pct| {})
}

/// Hash the file at `path`, reporting progress as an integer percentage.
///
/// `on_progress` is called with a monotonically non-decreasing value, terminating at exactly
/// 100 once the file has been fully read. For files under 1 MiB progress may jump straight to
/// 100 in a single call, since the whole file is read in one pass.
pub fn hash_with_progress(path: &Path, mut on_progress: impl FnMut(u8)) -> Result<Digest, Error> {
    let to_err = |source: io::Error| Error::IO {
        path: path.to_owned(),
        source,
    };

    let size = fs::metadata(path).map_err(to_err)?.len();
    let mut file = File::open(path).map_err(to_err)?;

    if size == 0 {
        on_progress(100);
        return Ok(Digest::from_hasher(Sha256::new()));
    }

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; buffer_size_for(size)];
    let mut read_total = 0u64;
    let mut last_pct = 0u8;

    loop {
        let n = file.read(&mut buf).map_err(to_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        read_total += n as u64;

        let pct = ((read_total.saturating_mul(100)) / size).min(100) as u8;
        if pct > last_pct {
            on_progress(pct);
            last_pct = pct;
        }
    }
    if last_pct < 100 {
        on_progress(100);
    }

    Ok(Digest::from_hasher(hasher))
}

/// Hash many files in parallel, preserving the input order in the returned vector.
///
/// If `concurrency` is `None`, it is derived as
/// `min(cpu_count, free_memory_mib / 100, file_count)`, with a floor of 1.
pub fn hash_batch(
    paths: &[PathBuf],
    concurrency: Option<usize>,
) -> Vec<(PathBuf, Result<Digest, Error>)> {
    let workers = concurrency.unwrap_or_else(|| default_concurrency(paths.len()));
    log::debug!("hashing {} file(s) with {workers} worker(s)", paths.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    let hash_all = || {
        paths
            .par_iter()
            .map(|path| (path.clone(), hash(path)))
            .collect()
    };

    match pool {
        Ok(pool) => pool.install(hash_all),
        Err(err) => {
            log::warn!("failed to build a dedicated thread pool ({err}), using the global one");
            hash_all()
        }
    }
}

fn default_concurrency(file_count: usize) -> usize {
    let cpu = num_cpus::get();
    let free_mib = free_memory_mib();
    [cpu, free_mib, file_count.max(1)]
        .into_iter()
        .min()
        .unwrap_or(1)
        .max(1)
}

fn free_memory_mib() -> usize {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_memory();
    (sys.free_memory() / (1024 * 1024)).max(1) as usize / 100
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn hashes_empty_file() {
        let file = NamedTempFile::new().expect("tempfile");
        let digest = hash(file.path()).expect("hash");
        // SHA-256 of the empty string.
        assert_eq!(
            digest.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn same_content_same_digest() {
        let mut a = NamedTempFile::new().expect("tempfile");
        let mut b = NamedTempFile::new().expect("tempfile");
        a.write_all(b"identical bytes").unwrap();
        b.write_all(b"identical bytes").unwrap();

        assert_eq!(
            hash(a.path()).expect("hash a"),
            hash(b.path()).expect("hash b")
        );
    }

    #[test]
    fn different_content_different_digest() {
        let mut a = NamedTempFile::new().expect("tempfile");
        let mut b = NamedTempFile::new().expect("tempfile");
        a.write_all(b"first").unwrap();
        b.write_all(b"second").unwrap();

        assert_ne!(
            hash(a.path()).expect("hash a"),
            hash(b.path()).expect("hash b")
        );
    }

    #[test]
    fn progress_terminates_at_100() {
        let mut f = NamedTempFile::new().expect("tempfile");
        f.write_all(&vec![7u8; 2 * 1024 * 1024]).unwrap();

        let mut seen = Vec::new();
        hash_with_progress(f.path(), |pct| seen.push(pct)).expect("hash");

        assert_eq!(*seen.last().unwrap(), 100);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn batch_preserves_input_order() {
        let mut files = Vec::new();
        for i in 0..8u8 {
            let mut f = NamedTempFile::new().expect("tempfile");
            f.write_all(&[i]).unwrap();
            files.push(f);
        }
        let paths: Vec<PathBuf> = files.iter().map(|f| f.path().to_owned()).collect();

        let results = hash_batch(&paths, Some(4));
        let result_paths: Vec<PathBuf> = results.into_iter().map(|(p, _)| p).collect();
        assert_eq!(result_paths, paths);
    }
}

