use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::encoura::{EncouraClient, EncouraError, SkipReason};
use crate::sanitize::StagedNames;
use crate::sftp::relay::SinkConnector;
use crate::sftp::{ConnectError, UploadOutcome, collect_local_files, relay_batch};

/// Outcome of the download phase.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    /// Files written to the staging directory in this run.
    pub staged: Vec<PathBuf>,
    pub failed: usize,
    /// Exports listed but without a resolvable download URL.
    pub skipped: usize,
    /// Login or listing failed; nothing was attempted.
    pub aborted: bool,
}

/// Outcome of the upload phase.
#[derive(Debug, Default)]
pub struct UploadSummary {
    pub relayed: usize,
    pub failed: usize,
    /// Scan or connect failed; no file was attempted.
    pub aborted: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub downloads: DownloadSummary,
    pub uploads: UploadSummary,
}

impl RunReport {
    fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            staged = self.downloads.staged.len(),
            download_failures = self.downloads.failed,
            skipped_exports = self.downloads.skipped,
            downloads_aborted = self.downloads.aborted,
            relayed = self.uploads.relayed,
            upload_failures = self.uploads.failed,
            uploads_aborted = self.uploads.aborted,
            elapsed_ms = (self.finished_at - self.started_at).num_milliseconds(),
            "Relay run finished"
        );
    }
}

/// Runs one pass: login, download pending exports, relay staged files.
///
/// Every failure is logged here and folded into the [`RunReport`]; nothing
/// propagates to the caller.
pub struct RelayOrchestrator<'a, C> {
    config: &'a RelayConfig,
    api: EncouraClient<'a>,
    connector: C,
}

impl<'a, C: SinkConnector> RelayOrchestrator<'a, C> {
    pub fn new(config: &'a RelayConfig, api: EncouraClient<'a>, connector: C) -> Self {
        Self {
            config,
            api,
            connector,
        }
    }

    pub async fn run(&mut self) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("relay_run", %run_id);

        async {
            let started_at = Utc::now();
            info!("Relay run started");

            // Downloads always finish before the upload scan starts.
            let downloads = self.download_phase().await;
            let uploads = self.upload_phase().await;

            let report = RunReport {
                run_id,
                started_at,
                finished_at: Utc::now(),
                downloads,
                uploads,
            };
            report.log_summary();
            report
        }
        .instrument(span)
        .await
    }

    async fn download_phase(&mut self) -> DownloadSummary {
        let mut summary = DownloadSummary::default();
        let api_settings = &self.config.api;

        if let Err(e) = self
            .api
            .login(&api_settings.username, &api_settings.password)
            .await
        {
            error!(error = %e, "Login failed, skipping downloads");
            summary.aborted = true;
            return summary;
        }
        info!("Logged in successfully");

        let listing = match self.api.list_pending_exports().await {
            Ok(listing) => listing,
            Err(e) => {
                error!(error = %e, "Failed to list pending exports");
                summary.aborted = true;
                return summary;
            }
        };

        for skipped in &listing.skipped {
            match &skipped.reason {
                SkipReason::Resolve(e) => {
                    warn!(uid = ?skipped.uid, error = %e, "Failed to resolve export download URL")
                }
                reason => debug!(uid = ?skipped.uid, ?reason, "Skipping export"),
            }
        }
        summary.skipped = listing.skipped.len();

        if listing.ready.is_empty() {
            info!("No files to download!");
            return summary;
        }

        let dir = &self.config.paths.download_dir;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create download directory");
            summary.aborted = true;
            return summary;
        }

        let mut names = StagedNames::new();
        for export in &listing.ready {
            let dest = dir.join(names.assign(&export.download_url, &export.uid));
            info!(url = %export.download_url, "Downloading file");

            match self.api.download_file(&export.download_url, &dest).await {
                Ok(bytes) => {
                    info!(path = %dest.display(), bytes, "Wrote file");
                    summary.staged.push(dest);
                }
                Err(EncouraError::Api { status, message }) => {
                    error!(url = %export.download_url, status, "There was an error retrieving file");
                    error!(body = %message, "Download error response");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(url = %export.download_url, error = %e, "Download failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    async fn upload_phase(&self) -> UploadSummary {
        let mut summary = UploadSummary::default();
        let paths = &self.config.paths;

        let files = if paths.download_dir.exists() {
            match collect_local_files(&paths.download_dir, &paths.upload_extension) {
                Ok(files) => files,
                Err(e) => {
                    error!(error = %e, "Failed to scan download directory");
                    summary.aborted = true;
                    return summary;
                }
            }
        } else {
            Vec::new()
        };

        if files.is_empty() {
            info!("No files to upload!");
            return summary;
        }

        let report = match relay_batch(&self.connector, &files).await {
            Ok(report) => report,
            Err(e) => {
                match &e {
                    ConnectError::Authentication { .. } => {
                        error!(error = %e, "Can't connect due to authentication error")
                    }
                    ConnectError::Transport { .. } => {
                        error!(error = %e, "Can't connect due to other error")
                    }
                    ConnectError::Session { .. } => error!(error = %e, "SFTP failed"),
                }
                summary.aborted = true;
                return summary;
            }
        };

        for (path, outcome) in &report.outcomes {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match outcome {
                UploadOutcome::Relayed { bytes } => info!(%file, bytes, "File successfully uploaded"),
                UploadOutcome::Failed(e) if e.is_permission_denied() => error!(
                    %file,
                    error = %e,
                    "SFTP operation failed due to a permissions error on the remote server"
                ),
                UploadOutcome::Failed(e) => {
                    error!(%file, error = %e, "SFTP operation failed due to other error")
                }
            }
        }
        summary.relayed = report.relayed();
        summary.failed = report.failed();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::relay::fakes::{FakeConnector, Refusal};
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, download_dir: &std::path::Path) -> RelayConfig {
        let env: HashMap<&str, String> = HashMap::from([
            ("ENCOURA_API_URL", server.uri()),
            ("ENCOURA_API_KEY", "key-123".to_string()),
            ("ENCOURA_ORGANIZATION_UID", "org-1".to_string()),
            ("ENCOURA_USERNAME", "api-user".to_string()),
            ("ENCOURA_PASSWORD", "api-pass".to_string()),
            ("SLATE_HALIA_SFTP_UN", "sftp-user".to_string()),
            ("SLATE_HALIA_SFTP_PW", "sftp-pass".to_string()),
            (
                "ENCOURA_DOWNLOAD_DIR",
                download_dir.to_string_lossy().into_owned(),
            ),
        ]);
        RelayConfig::from_sources(None, |name| env.get(name).cloned()).unwrap()
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sessionToken": "tok"})))
            .mount(server)
            .await;
    }

    async fn mount_exports(server: &MockServer, exports: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/datacenter/exports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(exports))
            .mount(server)
            .await;
    }

    async fn mount_resolve(server: &MockServer, uid: &str, url: String) {
        Mock::given(method("GET"))
            .and(path(format!("/datacenter/exports/{uid}/download")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"downloadUrl": url})))
            .mount(server)
            .await;
    }

    fn dir_entries(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn download_creates_sanitized_file_with_full_body() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_exports(&server, json!([{"uid": "X", "status": "NotDelivered"}])).await;
        mount_resolve(&server, "X", format!("{}/path/My File.csv", server.uri())).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/path/My(%20| )File\.csv$"))
            .respond_with(ResponseTemplate::new(200).set_body_string("id,score\n1,99\n2,87\n"))
            .mount(&server)
            .await;

        let staging = TempDir::new().unwrap();
        let config = test_config(&server, staging.path());
        let api = EncouraClient::new(&config.api).unwrap();
        let mut orch = RelayOrchestrator::new(&config, api, FakeConnector::default());

        let summary = orch.download_phase().await;

        assert_eq!(summary.staged.len(), 1);
        assert_eq!(dir_entries(staging.path()), vec!["My_File.csv"]);
        assert_eq!(
            fs::read_to_string(staging.path().join("My_File.csv")).unwrap(),
            "id,score\n1,99\n2,87\n"
        );
    }

    #[tokio::test]
    async fn one_failed_download_does_not_stop_others() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_exports(&server, json!([{"uid": "bad"}, {"uid": "good"}])).await;
        mount_resolve(&server, "bad", format!("{}/files/bad.csv", server.uri())).await;
        mount_resolve(&server, "good", format!("{}/files/good.csv", server.uri())).await;
        Mock::given(method("GET"))
            .and(path("/files/bad.csv"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/good.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let staging = TempDir::new().unwrap();
        let config = test_config(&server, staging.path());
        let api = EncouraClient::new(&config.api).unwrap();
        let mut orch = RelayOrchestrator::new(&config, api, FakeConnector::default());

        let summary = orch.download_phase().await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.staged.len(), 1);
        assert_eq!(dir_entries(staging.path()), vec!["good.csv"]);
    }

    #[tokio::test]
    async fn empty_run_creates_nothing_and_never_connects() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_exports(&server, json!([])).await;

        let staging = TempDir::new().unwrap();
        let config = test_config(&server, staging.path());
        let api = EncouraClient::new(&config.api).unwrap();
        let connector = FakeConnector::default();
        let mut orch = RelayOrchestrator::new(&config, api, connector.clone());

        let report = orch.run().await;

        assert!(report.downloads.staged.is_empty());
        assert!(!report.downloads.aborted);
        assert_eq!(report.uploads.relayed, 0);
        assert!(!report.uploads.aborted);
        assert!(dir_entries(staging.path()).is_empty());
        assert_eq!(connector.state.lock().unwrap().connects, 0);
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn full_run_downloads_then_relays() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_exports(&server, json!([{"uid": "X"}])).await;
        mount_resolve(&server, "X", format!("{}/files/weekly.csv", server.uri())).await;
        Mock::given(method("GET"))
            .and(path("/files/weekly.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
            .mount(&server)
            .await;

        let staging = TempDir::new().unwrap();
        let config = test_config(&server, staging.path());
        let api = EncouraClient::new(&config.api).unwrap();
        let connector = FakeConnector::default();
        let mut orch = RelayOrchestrator::new(&config, api, connector.clone());

        let report = orch.run().await;

        assert_eq!(report.downloads.staged.len(), 1);
        assert_eq!(report.uploads.relayed, 1);
        assert!(dir_entries(staging.path()).is_empty());
        let state = connector.state.lock().unwrap();
        assert_eq!(state.files["weekly.csv"], b"a,b\n1,2\n");
        assert_eq!(state.connects, 1);
        assert_eq!(state.closes, 1);
    }

    #[tokio::test]
    async fn login_failure_skips_downloads_but_relays_staged_files() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datacenter/exports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let staging = TempDir::new().unwrap();
        fs::write(staging.path().join("leftover.csv"), "from last run").unwrap();
        let config = test_config(&server, staging.path());
        let api = EncouraClient::new(&config.api).unwrap();
        let connector = FakeConnector::default();
        let mut orch = RelayOrchestrator::new(&config, api, connector.clone());

        let report = orch.run().await;

        assert!(report.downloads.aborted);
        assert_eq!(report.uploads.relayed, 1);
        assert!(connector.state.lock().unwrap().files.contains_key("leftover.csv"));
    }

    async fn run_with_refusing_connector(refusal: Refusal) -> (RunReport, RemoteStateSnapshot) {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_exports(&server, json!([])).await;

        let staging = TempDir::new().unwrap();
        fs::write(staging.path().join("a.csv"), "a").unwrap();
        let config = test_config(&server, staging.path());
        let api = EncouraClient::new(&config.api).unwrap();
        let connector = FakeConnector::refusing(refusal);
        let mut orch = RelayOrchestrator::new(&config, api, connector.clone());

        let report = orch.run().await;

        let state = connector.state.lock().unwrap();
        let snapshot = RemoteStateSnapshot {
            staged_left: dir_entries(staging.path()),
            uploaded: state.files.len(),
            connects: state.connects,
            disconnects: state.disconnects,
            closes: state.closes,
        };
        (report, snapshot)
    }

    #[derive(Debug)]
    struct RemoteStateSnapshot {
        staged_left: Vec<String>,
        uploaded: usize,
        connects: usize,
        disconnects: usize,
        closes: usize,
    }

    #[tokio::test]
    async fn connect_failure_aborts_uploads_and_keeps_files() {
        let (report, seen) = run_with_refusing_connector(Refusal::Transport).await;

        assert!(report.uploads.aborted);
        assert_eq!(report.uploads.relayed, 0);
        assert_eq!(seen.staged_left, vec!["a.csv"]);
        assert_eq!(seen.uploaded, 0);
        assert_eq!(seen.connects, 1);
        assert_eq!(seen.disconnects, 0);
        assert_eq!(seen.closes, 0);
    }

    #[tokio::test]
    async fn sftp_auth_failure_aborts_uploads_and_keeps_files() {
        let (report, seen) = run_with_refusing_connector(Refusal::Authentication).await;

        assert!(report.uploads.aborted);
        assert_eq!(report.uploads.relayed, 0);
        assert_eq!(seen.staged_left, vec!["a.csv"]);
        assert_eq!(seen.uploaded, 0);
        assert_eq!(seen.connects, 1);
        assert_eq!(seen.disconnects, 1);
        assert_eq!(seen.closes, 0);
    }

    #[tokio::test]
    async fn sftp_session_failure_aborts_uploads_and_keeps_files() {
        let (report, seen) = run_with_refusing_connector(Refusal::Session).await;

        assert!(report.uploads.aborted);
        assert_eq!(report.uploads.relayed, 0);
        assert_eq!(seen.staged_left, vec!["a.csv"]);
        assert_eq!(seen.uploaded, 0);
        assert_eq!(seen.connects, 1);
        assert_eq!(seen.disconnects, 1);
        assert_eq!(seen.closes, 0);
    }

    #[tokio::test]
    async fn missing_download_dir_means_nothing_to_upload() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_exports(&server, json!([])).await;

        let root = TempDir::new().unwrap();
        let config = test_config(&server, &root.path().join("not-yet-created"));
        let api = EncouraClient::new(&config.api).unwrap();
        let connector = FakeConnector::default();
        let mut orch = RelayOrchestrator::new(&config, api, connector.clone());

        let report = orch.run().await;

        assert!(!report.uploads.aborted);
        assert_eq!(connector.state.lock().unwrap().connects, 0);
    }
}
