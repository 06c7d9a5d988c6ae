//! Erros do relay SFTP.
//!
//! Separa as falhas que abortam o lote inteiro ([`ConnectError`]) das
//! falhas por arquivo ([`TransferError`]), que nunca interrompem o lote.

use std::path::PathBuf;

use thiserror::Error;

/// Falha ao abrir o transporte SSH ou a sessão SFTP sobre ele.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// TCP, handshake SSH ou verificação da chave do servidor.
    #[error("can't connect to {addr}: {reason}")]
    Transport { addr: String, reason: String },

    /// O servidor recusou as credenciais.
    #[error("authentication rejected for {username}@{addr}: {reason}")]
    Authentication {
        addr: String,
        username: String,
        reason: String,
    },

    /// O transporte abriu, mas o canal ou o subsistema `sftp` falhou.
    #[error("SFTP session failed on {addr}: {reason}")]
    Session { addr: String, reason: String },
}

/// Falha de um único arquivo; o arquivo local é mantido.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("permission denied on remote path {remote_path}: {message}")]
    PermissionDenied {
        remote_path: String,
        message: String,
    },

    #[error("transfer to {remote_path} failed: {message}")]
    Remote {
        remote_path: String,
        message: String,
    },

    #[error("failed to read local file {path}: {source}")]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// O upload terminou, mas a cópia local não pôde ser removida.
    #[error("uploaded but failed to remove local file {path}: {source}")]
    LocalCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, TransferError::PermissionDenied { .. })
    }
}

/// Falha ao varrer o diretório de staging.
#[derive(Debug, Error)]
#[error("failed to scan {path}: {source}")]
pub struct ScanError {
    pub path: PathBuf,
    #[source]
    pub source: walkdir::Error,
}
