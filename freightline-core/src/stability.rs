//! Stability checker (C4): confirms a matched file is no longer being written before it enters
//! the hash stage.
//!
//! No teacher module does anything like this directly; it is built in the teacher's idiom all
//! the same — a small `typed_builder` profile struct, a plain status enum, and platform dispatch
//! via `#[cfg(windows)]`/`#[cfg(unix)]` modules, the same shape `archive::walk` uses to isolate
//! its scratch-directory `Drop` from the rest of the crate.

use std::fs::OpenOptions;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::config::StabilityProfile;

/// The outcome of a single stability probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The file looks quiescent.
    Stable,
    /// The file exists but could not be opened for read+write (likely held open by another
    /// process).
    Locked,
    /// The file no longer exists.
    NotExist,
    /// A large file's mtime changed between samples.
    Writing,
    /// A large file's size changed between samples.
    SizeChanging,
    /// The probe itself failed (permissions, transient IO error).
    CheckFailed,
}

/// Probe `path` once and report its current [`Status`].
pub fn is_stable(path: &Path, profile: &StabilityProfile) -> Status {
    match is_stable_inner(path, profile) {
        Ok(status) => status,
        Err(_) => Status::CheckFailed,
    }
}

fn is_stable_inner(path: &Path, profile: &StabilityProfile) -> std::io::Result<Status> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Status::NotExist),
        Err(e) => return Err(e),
    };

    if OpenOptions::new().read(true).write(true).open(path).is_err() {
        return Ok(Status::Locked);
    }

    if metadata.len() > profile.large_file_threshold && profile.skip_read_for_large_files {
        return Ok(large_file::probe(path, profile));
    }

    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; 1];
    match file.read(&mut buf) {
        Ok(_) => Ok(Status::Stable),
        Err(_) => Ok(Status::Locked),
    }
}

/// Poll `path` until two consecutive [`Status::Stable`] readings are observed, up to
/// `profile.max_retries` non-stable attempts. Returns `false` if stability was never confirmed.
pub async fn wait_for_stability(path: &Path, profile: &StabilityProfile) -> bool {
    let mut consecutive_stable = 0usize;
    let mut attempts = 0usize;
    loop {
        let status = {
            let path = path.to_owned();
            let profile = *profile;
            tokio::task::spawn_blocking(move || is_stable(&path, &profile))
                .await
                .unwrap_or(Status::CheckFailed)
        };

        if status == Status::Stable {
            consecutive_stable += 1;
            if consecutive_stable >= 2 {
                return true;
            }
        } else {
            consecutive_stable = 0;
            attempts += 1;
            if attempts >= profile.max_retries {
                return false;
            }
        }

        tokio::time::sleep(Duration::from_millis(profile.retry_interval_ms)).await;
    }
}

#[cfg(unix)]
mod large_file {
    use std::path::Path;
    use std::thread::sleep;
    use std::time::Duration;

    use super::Status;
    use crate::config::StabilityProfile;

    pub fn probe(path: &Path, profile: &StabilityProfile) -> Status {
        let Ok(first) = std::fs::metadata(path) else {
            return Status::CheckFailed;
        };
        sleep(Duration::from_millis(profile.check_interval_ms));
        let Ok(second) = std::fs::metadata(path) else {
            return Status::CheckFailed;
        };

        if first.len() != second.len() {
            return Status::SizeChanging;
        }
        let modified_changed = match (first.modified(), second.modified()) {
            (Ok(a), Ok(b)) => a != b,
            _ => false,
        };
        if modified_changed {
            return Status::Writing;
        }
        Status::Stable
    }
}

#[cfg(windows)]
mod large_file {
    use std::path::Path;

    use super::Status;
    use crate::config::StabilityProfile;

    /// On Windows an exclusive-rename round trip is a reliable proxy for "nothing else has the
    /// file open for write", which is cheaper than sampling metadata twice for multi-gigabyte
    /// files.
    pub fn probe(path: &Path, _profile: &StabilityProfile) -> Status {
        let probe_path = path.with_extension("freightline-stability-probe");
        if std::fs::rename(path, &probe_path).is_err() {
            return Status::Locked;
        }
        match std::fs::rename(&probe_path, path) {
            Ok(()) => Status::Stable,
            Err(_) => Status::Locked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profile() -> StabilityProfile {
        StabilityProfile::builder().build()
    }

    #[test]
    fn missing_file_is_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.bin");
        assert_eq!(is_stable(&path, &profile()), Status::NotExist);
    }

    #[test]
    fn small_readable_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::File::create(&path).unwrap().write_all(b"hello").unwrap();
        assert_eq!(is_stable(&path, &profile()), Status::Stable);
    }

    #[tokio::test]
    async fn wait_for_stability_succeeds_for_a_static_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::File::create(&path).unwrap().write_all(b"hello").unwrap();
        assert!(wait_for_stability(&path, &profile()).await);
    }

    #[tokio::test]
    async fn wait_for_stability_fails_for_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.bin");
        let profile = StabilityProfile::builder().max_retries(1).retry_interval_ms(1).build();
        assert!(!wait_for_stability(&path, &profile).await);
    }
}
