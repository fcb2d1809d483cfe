//! SFTP transport, backed by `ssh2`.
//!
//! `ssh2`'s session and channel types are synchronous and not `Send` across an `.await` point in
//! a useful way, so the whole connect/upload/disconnect lifecycle for a given call runs inside
//! `spawn_blocking`, the same pattern used for the FTP adapter.

use std::{
    io::{Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::debug;
use ssh2::Session;

use crate::{err_result, now, ok_result, Endpoint, Error, Transport, UploadResult};

/// An SFTP transport targeting a single endpoint.
pub struct Sftp {
    endpoint: Endpoint,
    session: Option<Session>,
}

impl Sftp {
    /// Create a new SFTP transport for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session: None,
        }
    }

    fn connect_blocking(endpoint: &Endpoint) -> Result<Session, Error> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let tcp = TcpStream::connect(&addr).map_err(|source| Error::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source: Box::new(source),
        })?;

        let mut session = Session::new().map_err(|source| Error::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source: Box::new(source),
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|source| Error::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source: Box::new(source),
        })?;
        session
            .userauth_password(&endpoint.username, &endpoint.password)
            .map_err(|source| Error::Authenticate {
                username: endpoint.username.clone(),
                source: Box::new(source),
            })?;

        Ok(session)
    }
}

#[async_trait]
impl Transport for Sftp {
    async fn connect(&mut self) -> Result<(), Error> {
        debug!("sftp transport: connecting to {}:{}", self.endpoint.host, self.endpoint.port);
        let endpoint = self.endpoint.clone();
        let session = tokio::task::spawn_blocking(move || Sftp::connect_blocking(&endpoint))
            .await
            .expect("sftp connect thread must not panic")?;
        self.session = Some(session);
        Ok(())
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<UploadResult, Error> {
        let start = now();
        let base = self.endpoint.remote_path.clone();
        let remote_full = format!("{}/{}", base.trim_end_matches('/'), remote);
        debug!("sftp transport: uploading {local:?} to {remote_full}");

        let local_owned: PathBuf = local.to_owned();
        let Some(session) = self.session.take() else {
            return Ok(err_result(
                local,
                &remote_full,
                start,
                &Error::Upload {
                    local: local_owned,
                    remote: remote_full.clone(),
                    source: "not connected".into(),
                },
            ));
        };

        let remote_for_task = remote_full.clone();
        let (session, outcome) = tokio::task::spawn_blocking(move || {
            let result = (|| -> Result<(), Error> {
                let sftp = session.sftp().map_err(|source| Error::Upload {
                    local: local_owned.clone(),
                    remote: remote_for_task.clone(),
                    source: Box::new(source),
                })?;

                if let Some((dir, _)) = remote_for_task.rsplit_once('/') {
                    let _ = sftp.mkdir(Path::new(dir), 0o755);
                }

                let mut contents = Vec::new();
                std::fs::File::open(&local_owned)?.read_to_end(&mut contents)?;

                let mut remote_file = sftp
                    .create(Path::new(&remote_for_task))
                    .map_err(|source| Error::Upload {
                        local: local_owned.clone(),
                        remote: remote_for_task.clone(),
                        source: Box::new(source),
                    })?;
                remote_file.write_all(&contents)?;
                Ok(())
            })();
            (session, result)
        })
        .await
        .expect("sftp upload thread must not panic");

        self.session = Some(session);
        match outcome {
            Ok(()) => Ok(ok_result(local, &remote_full, start)),
            Err(err) => Ok(err_result(local, &remote_full, start, &err)),
        }
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.session = None;
        Ok(())
    }
}
