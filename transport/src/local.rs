//! A transport that copies to another directory on the local filesystem.
//!
//! Used for dry runs and integration tests, where standing up a real FTP/SFTP server is
//! impractical. `remote` paths are resolved relative to the configured destination root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;

use crate::{err_result, now, ok_result, Error, Transport, UploadResult};

/// Copies uploads into a directory on the local filesystem rather than a remote endpoint.
#[derive(Clone, Debug)]
pub struct Local {
    root: PathBuf,
}

impl Local {
    /// Create a new local transport rooted at `root`. `root` is created on [`connect`](Transport::connect) if missing.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Transport for Local {
    async fn connect(&mut self) -> Result<(), Error> {
        debug!("local transport: ensuring destination root {:?} exists", self.root);
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<UploadResult, Error> {
        let start = now();
        let dest = self.root.join(remote);
        debug!("local transport: copying {local:?} to {dest:?}");

        let result = async {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(local, &dest).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => Ok(ok_result(local, remote, start)),
            Err(source) => Ok(err_result(local, remote, start, &Error::from(source))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn copies_file_into_destination_root() {
        let src_dir = tempdir().expect("tempdir");
        let dst_dir = tempdir().expect("tempdir");

        let src = src_dir.path().join("a.txt");
        std::fs::File::create(&src).unwrap().write_all(b"hi").unwrap();

        let mut transport = Local::new(dst_dir.path());
        transport.connect().await.expect("connect");
        let result = transport.upload(&src, "nested/a.txt").await.expect("upload");
        transport.disconnect().await.expect("disconnect");

        assert!(result.success);
        assert_eq!(
            std::fs::read(dst_dir.path().join("nested/a.txt")).unwrap(),
            b"hi"
        );
    }

    #[tokio::test]
    async fn missing_source_reports_failure_without_error() {
        let dst_dir = tempdir().expect("tempdir");
        let mut transport = Local::new(dst_dir.path());
        transport.connect().await.expect("connect");

        let result = transport
            .upload(Path::new("/does/not/exist"), "x.txt")
            .await
            .expect("upload call itself doesn't error");

        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
