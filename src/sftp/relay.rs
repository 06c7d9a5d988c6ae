use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::error::{ConnectError, ScanError, TransferError};

/// Opens a remote session for one upload batch.
#[allow(async_fn_in_trait)]
pub trait SinkConnector {
    type Sink: RemoteSink;

    async fn connect(&self) -> Result<Self::Sink, ConnectError>;
}

/// An open remote session that accepts files.
#[allow(async_fn_in_trait)]
pub trait RemoteSink {
    /// Uploads `local` into the remote directory as `file_name`, returning
    /// the number of bytes sent.
    async fn put(&mut self, local: &Path, file_name: &str) -> Result<u64, TransferError>;

    /// Releases the session and its transport.
    async fn close(self);
}

/// Result of relaying a single staged file.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Uploaded and removed locally.
    Relayed { bytes: u64 },
    /// Not relayed; the local file is still on disk.
    Failed(TransferError),
}

#[derive(Debug, Default)]
pub struct RelayReport {
    pub outcomes: Vec<(PathBuf, UploadOutcome)>,
}

impl RelayReport {
    pub fn relayed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, UploadOutcome::Relayed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.relayed()
    }
}

/// Recursively collects regular files under `dir` whose extension is
/// `extension`, sorted by path. Symlinks are followed.
pub fn collect_local_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|source| ScanError {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Uploads each file through `sink`, deleting the local copy only after a
/// successful put. A failure on one file never stops the batch.
pub async fn relay_files<S: RemoteSink>(sink: &mut S, files: &[PathBuf]) -> RelayReport {
    let mut report = RelayReport::default();
    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let outcome = match sink.put(path, &file_name).await {
            Ok(bytes) => match tokio::fs::remove_file(path).await {
                Ok(()) => UploadOutcome::Relayed { bytes },
                Err(source) => UploadOutcome::Failed(TransferError::LocalCleanup {
                    path: path.clone(),
                    source,
                }),
            },
            Err(e) => UploadOutcome::Failed(e),
        };
        report.outcomes.push((path.clone(), outcome));
    }
    report
}

/// Connects, relays `files` and closes the session.
///
/// Only a connect failure is returned as an error; per-file failures are
/// in the report.
pub async fn relay_batch<C: SinkConnector>(
    connector: &C,
    files: &[PathBuf],
) -> Result<RelayReport, ConnectError> {
    let mut sink = connector.connect().await?;
    let report = relay_files(&mut sink, files).await;
    sink.close().await;
    Ok(report)
}
