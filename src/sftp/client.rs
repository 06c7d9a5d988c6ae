//! SSH transport and SFTP session for the relay.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::Disconnect;
use russh::client::{self, Config, Handle, Handler};
use russh::keys::{HashAlg, PublicKey};
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::protocol::{OpenFlags, StatusCode};
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use super::error::{ConnectError, TransferError};
use super::relay::{RemoteSink, SinkConnector};
use crate::config::SftpSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens SFTP sessions against the configured partner server.
pub struct SftpConnector<'a> {
    settings: &'a SftpSettings,
    config: Arc<Config>,
}

impl<'a> SftpConnector<'a> {
    pub fn new(settings: &'a SftpSettings) -> Self {
        let config = Config {
            inactivity_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        Self {
            settings,
            config: Arc::new(config),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }
}

impl SinkConnector for SftpConnector<'_> {
    type Sink = SftpSink;

    async fn connect(&self) -> Result<SftpSink, ConnectError> {
        let addr = self.addr();
        let handler = HostKeyPolicy {
            expected: self.settings.host_key_fingerprint.clone(),
        };

        let connecting = client::connect(
            Arc::clone(&self.config),
            (self.settings.host.as_str(), self.settings.port),
            handler,
        );
        let mut handle = timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| ConnectError::Transport {
                addr: addr.clone(),
                reason: format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()),
            })?
            .map_err(|e| ConnectError::Transport {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        let auth = handle
            .authenticate_password(
                self.settings.username.as_str(),
                self.settings.password.expose_secret(),
            )
            .await;
        let rejected = match auth {
            Ok(result) if result.success() => None,
            Ok(_) => Some("rejected by server".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = rejected {
            disconnect(&handle).await;
            return Err(ConnectError::Authentication {
                addr,
                username: self.settings.username.clone(),
                reason,
            });
        }

        match open_sftp(&handle).await {
            Ok(sftp) => Ok(SftpSink {
                handle,
                sftp,
                remote_dir: self.settings.remote_dir.clone(),
            }),
            Err(reason) => {
                disconnect(&handle).await;
                Err(ConnectError::Session { addr, reason })
            }
        }
    }
}

async fn open_sftp(handle: &Handle<HostKeyPolicy>) -> Result<SftpSession, String> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| format!("failed to open channel: {e}"))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| format!("failed to request sftp subsystem: {e}"))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| format!("failed to initialize SFTP session: {e}"))
}

async fn disconnect(handle: &Handle<HostKeyPolicy>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!(error = %e, "SSH disconnect failed");
    }
}

/// Accepts the server key when it matches the pinned fingerprint, or any
/// key when none is pinned.
struct HostKeyPolicy {
    expected: Option<String>,
}

impl Handler for HostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.expected {
            Some(expected) => {
                let accepted = fingerprint_matches(expected, &fingerprint);
                if !accepted {
                    tracing::error!(%fingerprint, %expected, "SFTP host key does not match pinned fingerprint");
                }
                Ok(accepted)
            }
            None => {
                tracing::warn!(%fingerprint, "Accepting SFTP host key without a pinned fingerprint");
                Ok(true)
            }
        }
    }
}

// Tolerates a missing `SHA256:` prefix and base64 padding.
fn fingerprint_matches(expected: &str, actual: &str) -> bool {
    fn normalize(s: &str) -> &str {
        let s = s.trim();
        s.strip_prefix("SHA256:").unwrap_or(s).trim_end_matches('=')
    }
    normalize(expected) == normalize(actual)
}

/// An open SFTP session writing into the configured remote directory.
pub struct SftpSink {
    handle: Handle<HostKeyPolicy>,
    sftp: SftpSession,
    remote_dir: String,
}

impl RemoteSink for SftpSink {
    async fn put(&mut self, local: &Path, file_name: &str) -> Result<u64, TransferError> {
        let remote_path = remote_path(&self.remote_dir, file_name);

        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|source| TransferError::LocalRead {
                path: local.to_path_buf(),
                source,
            })?;

        let mut remote = self
            .sftp
            .open_with_flags(
                remote_path.clone(),
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| classify_sftp_error(e, &remote_path))?;

        let bytes = tokio::io::copy(&mut source, &mut remote)
            .await
            .map_err(|e| classify_io_error(e, &remote_path))?;
        remote
            .shutdown()
            .await
            .map_err(|e| classify_io_error(e, &remote_path))?;

        Ok(bytes)
    }

    async fn close(self) {
        if let Err(e) = self.sftp.close().await {
            tracing::debug!(error = %e, "SFTP session close failed");
        }
        disconnect(&self.handle).await;
    }
}

fn remote_path(remote_dir: &str, file_name: &str) -> String {
    format!("{}/{}", remote_dir.trim_end_matches('/'), file_name)
}

fn classify_sftp_error(err: SftpErrorInner, remote_path: &str) -> TransferError {
    match &err {
        SftpErrorInner::Status(status) if matches!(status.status_code, StatusCode::PermissionDenied) => {
            TransferError::PermissionDenied {
                remote_path: remote_path.to_string(),
                message: status.error_message.clone(),
            }
        }
        _ => TransferError::Remote {
            remote_path: remote_path.to_string(),
            message: err.to_string(),
        },
    }
}

fn classify_io_error(err: std::io::Error, remote_path: &str) -> TransferError {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        TransferError::PermissionDenied {
            remote_path: remote_path.to_string(),
            message: err.to_string(),
        }
    } else {
        TransferError::Remote {
            remote_path: remote_path.to_string(),
            message: err.to_string(),
        }
    }
}
