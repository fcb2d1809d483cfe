//! An abstract uploader with retry, and the concrete adapters the core pipeline is wired to.
//!
//! The pipeline coordinator never speaks FTP, FTPS, or SFTP directly: it holds a
//! `Box<dyn Transport>` and drives it through `connect` / `upload` / `disconnect`. This keeps the
//! protocol clients replaceable and lets tests substitute [`local::Local`] for a real endpoint.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod ftp;
mod local;
mod sftp;

pub use ftp::{Ftp, FtpMode};
pub use local::Local;
pub use sftp::Sftp;

/// Errors encountered by a [`Transport`] implementation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connecting to the remote endpoint failed.
    #[error("connect to {host}:{port}: {source}")]
    Connect {
        /// The remote host.
        host: String,
        /// The remote port.
        port: u16,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Authentication with the remote endpoint failed.
    #[error("authenticate as {username}: {source}")]
    Authenticate {
        /// The username used.
        username: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The upload itself failed after a connection was established.
    #[error("upload {local:?} to {remote:?}: {source}")]
    Upload {
        /// The local file that was being uploaded.
        local: PathBuf,
        /// The remote destination path.
        remote: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A generic IO error, typically reading the local file to upload.
    #[error("i/o error: {0}")]
    IO(#[from] std::io::Error),
}

/// Connection parameters for a remote transport endpoint.
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Username to authenticate as.
    pub username: String,
    /// Password (or passphrase) to authenticate with.
    pub password: String,
    /// Base remote path new uploads are placed under.
    pub remote_path: String,
}

/// The outcome of a single upload attempt.
#[derive(Clone, Debug)]
pub struct UploadResult {
    /// Whether the upload succeeded.
    pub success: bool,
    /// The local file that was uploaded.
    pub local_path: PathBuf,
    /// The remote path it was uploaded to.
    pub remote_path: String,
    /// The error encountered, if any.
    pub error: Option<String>,
    /// When the attempt started.
    pub start_time: DateTime<Utc>,
    /// When the attempt ended.
    pub end_time: DateTime<Utc>,
}

/// An abstract remote upload target.
///
/// Implementations are not expected to be internally retrying: the core pipeline owns retry
/// policy (attempt counts, delays) and simply calls `upload` again after a failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to the endpoint. Called once before any uploads.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Upload `local` to `remote`, relative to the endpoint's configured base path.
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<UploadResult, Error>;

    /// Tear down the connection. Called once after all uploads (success or failure).
    async fn disconnect(&mut self) -> Result<(), Error>;
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn ok_result(local: &Path, remote: &str, start: DateTime<Utc>) -> UploadResult {
    UploadResult {
        success: true,
        local_path: local.to_owned(),
        remote_path: remote.to_owned(),
        error: None,
        start_time: start,
        end_time: now(),
    }
}

pub(crate) fn err_result(
    local: &Path,
    remote: &str,
    start: DateTime<Utc>,
    error: &Error,
) -> UploadResult {
    UploadResult {
        success: false,
        local_path: local.to_owned(),
        remote_path: remote.to_owned(),
        error: Some(error.to_string()),
        start_time: start,
        end_time: now(),
    }
}
