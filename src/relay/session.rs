//! SFTP relay session
//!
//! Connects to one host's SFTP endpoint with password auth and exposes it
//! as a [`RemoteVolume`]. Paths handed in are joined under the endpoint's
//! configured root.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::PublicKey;
use russh::Disconnect;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use tracing::{debug, info};

use crate::config::SftpEndpoint;

use super::error::RelayError;
use super::path::join_remote_path;
use super::types::{FileStat, VolumeEntry};
use super::volume::{BoxedReader, BoxedWriter, RemoteVolume};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Relay endpoints are credentialed per-host SFTP services addressed by the
/// injected configuration; the server key is accepted on connect.
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One connected SFTP relay endpoint.
pub struct SftpSession {
    handle: client::Handle<ClientHandler>,
    sftp: RusshSftpSession,
    root: String,
    label: String,
}

impl SftpSession {
    /// Connect and open the SFTP subsystem.
    pub async fn connect(
        endpoint: &SftpEndpoint,
        label: impl Into<String>,
    ) -> Result<Self, RelayError> {
        let label = label.into();
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        info!(host = %label, %addr, "connecting to relay endpoint");

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| RelayError::ConnectionFailed(format!("failed to resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| RelayError::ConnectionFailed(format!("no address found for {addr}")))?;

        let ssh_config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(Arc::new(ssh_config), socket_addr, ClientHandler),
        )
        .await
        .map_err(|_| RelayError::ConnectionFailed(format!("connection to {addr} timed out")))?
        .map_err(|e| RelayError::ConnectionFailed(e.to_string()))?;

        let authenticated = handle
            .authenticate_password(&endpoint.username, &endpoint.password)
            .await
            .map_err(|e| RelayError::AuthenticationFailed(e.to_string()))?;
        if !authenticated.success() {
            return Err(RelayError::AuthenticationFailed(
                "password rejected by server".to_string(),
            ));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RelayError::Protocol(e.to_string()))?;
        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            RelayError::SubsystemNotAvailable(format!("failed to request SFTP subsystem: {e}"))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RelayError::SubsystemNotAvailable(e.to_string()))?;

        info!(host = %label, "SFTP subsystem opened");

        Ok(Self {
            handle,
            sftp,
            root: endpoint.root_path.clone(),
            label,
        })
    }

    fn full_path(&self, path: &str) -> String {
        join_remote_path(&self.root, path)
    }

    fn map_sftp_error(err: SftpErrorInner, path: &str) -> RelayError {
        let err_str = err.to_string();
        if err_str.contains("No such file") || err_str.contains("not found") {
            RelayError::FileNotFound(path.to_string())
        } else {
            RelayError::Protocol(err_str)
        }
    }
}

#[async_trait]
impl RemoteVolume for SftpSession {
    async fn stat(&self, path: &str) -> Result<FileStat, RelayError> {
        let full = self.full_path(path);
        let metadata = self
            .sftp
            .metadata(&full)
            .await
            .map_err(|e| Self::map_sftp_error(e, &full))?;
        Ok(FileStat {
            size: metadata.size.unwrap_or(0),
            is_dir: metadata.is_dir(),
        })
    }

    async fn entries(&self, dir: &str) -> Result<Vec<VolumeEntry>, RelayError> {
        let full = self.full_path(dir);
        debug!(host = %self.label, dir = %full, "listing relay directory");

        let read_dir = self
            .sftp
            .read_dir(&full)
            .await
            .map_err(|e| Self::map_sftp_error(e, &full))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let metadata = entry.metadata();
            entries.push(VolumeEntry {
                path: join_remote_path(&full, &name),
                size: metadata.size.unwrap_or(0),
                is_dir: metadata.is_dir(),
                name,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open_read(&self, path: &str) -> Result<BoxedReader, RelayError> {
        let full = self.full_path(path);
        let file = self
            .sftp
            .open(&full)
            .await
            .map_err(|e| Self::map_sftp_error(e, &full))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> Result<BoxedWriter, RelayError> {
        let full = self.full_path(path);
        let file = self
            .sftp
            .create(&full)
            .await
            .map_err(|e| Self::map_sftp_error(e, &full))?;
        Ok(Box::new(file))
    }

    async fn mkdir(&self, path: &str) -> Result<(), RelayError> {
        let full = self.full_path(path);
        self.sftp
            .create_dir(&full)
            .await
            .map_err(|e| Self::map_sftp_error(e, &full))
    }

    async fn remove_file(&self, path: &str) -> Result<(), RelayError> {
        let full = self.full_path(path);
        self.sftp
            .remove_file(&full)
            .await
            .map_err(|e| Self::map_sftp_error(e, &full))
    }

    async fn close(&self) -> Result<(), RelayError> {
        info!(host = %self.label, "closing relay connection");
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| RelayError::Protocol(e.to_string()))
    }
}
