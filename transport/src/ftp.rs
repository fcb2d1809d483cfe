//! FTP and FTPS transport, backed by `suppaftp`.
//!
//! `suppaftp`'s client is synchronous, so every call is run on a blocking thread via
//! `tokio::task::spawn_blocking`, matching how this codebase keeps synchronous IO off the async
//! worker threads elsewhere (see the archive and fingerprint crates).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use suppaftp::{FtpStream, NativeTlsConnector, NativeTlsFtpStream};

use crate::{err_result, now, ok_result, Endpoint, Error, Transport, UploadResult};

/// Whether to negotiate TLS for the control and data channels.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum FtpMode {
    /// Plain FTP.
    Plain,
    /// Explicit FTPS (`AUTH TLS`).
    Explicit,
}

enum Stream {
    Plain(FtpStream),
    Tls(NativeTlsFtpStream),
}

/// An FTP or FTPS transport targeting a single endpoint.
pub struct Ftp {
    endpoint: Endpoint,
    mode: FtpMode,
    stream: Option<Stream>,
}

impl Ftp {
    /// Create a new FTP transport for `endpoint`.
    pub fn new(endpoint: Endpoint, mode: FtpMode) -> Self {
        Self {
            endpoint,
            mode,
            stream: None,
        }
    }

    fn connect_blocking(endpoint: &Endpoint, mode: FtpMode) -> Result<Stream, Error> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let connect_err = |source: suppaftp::FtpError| Error::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source: Box::new(source),
        };
        let auth_err = |source: suppaftp::FtpError| Error::Authenticate {
            username: endpoint.username.clone(),
            source: Box::new(source),
        };

        match mode {
            FtpMode::Plain => {
                let mut stream = FtpStream::connect(&addr).map_err(connect_err)?;
                stream
                    .login(&endpoint.username, &endpoint.password)
                    .map_err(auth_err)?;
                Ok(Stream::Plain(stream))
            }
            FtpMode::Explicit => {
                let tls = NativeTlsConnector::new();
                let mut stream = NativeTlsFtpStream::connect(&addr)
                    .map_err(connect_err)?
                    .into_secure(suppaftp::FtpStream::active_mode, tls)
                    .map_err(connect_err)?;
                stream
                    .login(&endpoint.username, &endpoint.password)
                    .map_err(auth_err)?;
                Ok(Stream::Tls(stream))
            }
        }
    }
}

#[async_trait]
impl Transport for Ftp {
    async fn connect(&mut self) -> Result<(), Error> {
        debug!("ftp transport: connecting to {}:{}", self.endpoint.host, self.endpoint.port);
        let endpoint = self.endpoint.clone();
        let mode = self.mode;
        let stream = tokio::task::spawn_blocking(move || Ftp::connect_blocking(&endpoint, mode))
            .await
            .expect("ftp connect thread must not panic")?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<UploadResult, Error> {
        let start = now();
        let base = self.endpoint.remote_path.clone();
        let remote_full = format!("{}/{}", base.trim_end_matches('/'), remote);
        debug!("ftp transport: uploading {local:?} to {remote_full}");

        let local_owned: PathBuf = local.to_owned();
        let stream = self.stream.take();
        let result = tokio::task::spawn_blocking(move || -> (Option<Stream>, Result<(), Error>) {
            let Some(mut stream) = stream else {
                return (
                    None,
                    Err(Error::Upload {
                        local: local_owned,
                        remote: remote_full.clone(),
                        source: "not connected".into(),
                    }),
                );
            };

            let outcome = (|| -> Result<(), Error> {
                if let Some((dir, _)) = remote_full.rsplit_once('/') {
                    match &mut stream {
                        Stream::Plain(s) => {
                            let _ = s.mkdir(dir);
                        }
                        Stream::Tls(s) => {
                            let _ = s.mkdir(dir);
                        }
                    }
                }

                let mut file = std::fs::File::open(&local_owned)?;
                let put_result = match &mut stream {
                    Stream::Plain(s) => s.put_file(&remote_full, &mut file).map(drop),
                    Stream::Tls(s) => s.put_file(&remote_full, &mut file).map(drop),
                };
                put_result.map_err(|source| Error::Upload {
                    local: local_owned.clone(),
                    remote: remote_full.clone(),
                    source: Box::new(source),
                })
            })();

            (Some(stream), outcome)
        })
        .await
        .expect("ftp upload thread must not panic");

        self.stream = result.0;
        match result.1 {
            Ok(()) => Ok(ok_result(local, &remote_full, start)),
            Err(err) => Ok(err_result(local, &remote_full, start, &err)),
        }
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        if let Some(stream) = self.stream.take() {
            let _ = tokio::task::spawn_blocking(move || match stream {
                Stream::Plain(mut s) => {
                    let _ = s.quit();
                }
                Stream::Tls(mut s) => {
                    let _ = s.quit();
                }
            })
            .await;
        }
        Ok(())
    }
}
