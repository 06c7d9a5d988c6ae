use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;

use super::error::EncouraError;
use super::types::{
    DownloadLink, ExportDescriptor, ExportListing, LoginRequest, LoginResponse, PendingExport,
    SkipReason, SkippedExport,
};
use crate::config::ApiSettings;

const PENDING_STATUS: &str = "NotDelivered";

/// Session against the Encoura Data Lab API.
///
/// Every call carries the static `x-api-key`; after a successful
/// [`login`](Self::login) the session token is attached as
/// `Authorization: JWT <token>`.
pub struct EncouraClient<'a> {
    settings: &'a ApiSettings,
    client: Client,
    // Sem timeout total: exports grandes podem levar mais que `settings.timeout`
    // para chegar. Só um intervalo sem bytes derruba o download.
    downloads: Client,
    session_token: Option<SecretString>,
}

impl<'a> EncouraClient<'a> {
    pub fn new(settings: &'a ApiSettings) -> Result<Self, EncouraError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.timeout)
            .build()?;
        let downloads = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(settings.timeout)
            .build()?;
        Ok(Self {
            settings,
            client,
            downloads,
            session_token: None,
        })
    }

    /// Logs in and keeps the session token for the following calls.
    ///
    /// A 2xx response without `sessionToken` is an error: continuing
    /// unauthenticated would only fail later at the server.
    pub async fn login(
        &mut self,
        username: &str,
        password: &SecretString,
    ) -> Result<(), EncouraError> {
        let body = LoginRequest {
            user_name: username,
            password: password.expose_secret(),
            accepted_terms: true,
        };
        let response = self
            .client
            .post(self.endpoint("login"))
            .header("x-api-key", self.settings.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let text = ensure_success(response).await?.text().await?;

        let token = serde_json::from_str::<LoginResponse>(&text)
            .ok()
            .and_then(|r| r.session_token)
            .filter(|t| !t.is_empty());
        match token {
            Some(token) => {
                self.session_token = Some(token.into());
                Ok(())
            }
            None => Err(EncouraError::MissingSessionToken { body: text }),
        }
    }

    /// Lists `NotDelivered` exports for the organization and resolves each
    /// one to its download URL.
    ///
    /// Only the listing call itself can fail the whole operation; exports
    /// without `uid`, without `downloadUrl`, or whose resolve call fails are
    /// reported in [`ExportListing::skipped`].
    pub async fn list_pending_exports(&self) -> Result<ExportListing, EncouraError> {
        let response = self
            .authorized(
                self.client
                    .get(self.endpoint("datacenter/exports"))
                    .query(&[("status", PENDING_STATUS)]),
            )
            .send()
            .await?;
        let exports: Vec<ExportDescriptor> = ensure_success(response).await?.json().await?;

        let mut listing = ExportListing::default();
        for export in exports {
            let Some(uid) = export.uid else {
                listing.skipped.push(SkippedExport {
                    uid: None,
                    reason: SkipReason::MissingUid,
                });
                continue;
            };

            match self.resolve_download_url(&uid).await {
                Ok(Some(download_url)) => listing.ready.push(PendingExport { uid, download_url }),
                Ok(None) => listing.skipped.push(SkippedExport {
                    uid: Some(uid),
                    reason: SkipReason::MissingDownloadUrl,
                }),
                Err(e) => listing.skipped.push(SkippedExport {
                    uid: Some(uid),
                    reason: SkipReason::Resolve(e),
                }),
            }
        }
        Ok(listing)
    }

    async fn resolve_download_url(&self, uid: &str) -> Result<Option<String>, EncouraError> {
        let path = format!("datacenter/exports/{}/download", urlencoding::encode(uid));
        let response = self
            .authorized(self.client.get(self.endpoint(&path)))
            .send()
            .await?;
        let link: DownloadLink = ensure_success(response).await?.json().await?;
        Ok(link.download_url.filter(|u| !u.is_empty()))
    }

    /// Streams `url` into `dest`, returning the number of bytes written.
    ///
    /// The URL is pre-signed, so no API headers are sent. The transfer is
    /// bounded by the configured timeout per read, not in total. The body goes to
    /// `<dest>.part` first and is renamed onto `dest` once complete; on a
    /// non-2xx status nothing is created and an existing `dest` is untouched.
    pub async fn download_file(&self, url: &str, dest: &Path) -> Result<u64, EncouraError> {
        let response = self.downloads.get(url).send().await?;
        let mut response = ensure_success(response).await?;

        let part = part_path(dest);
        match write_body(&mut response, &part).await {
            Ok(written) => {
                tokio::fs::rename(&part, dest)
                    .await
                    .map_err(|source| EncouraError::Write {
                        path: dest.to_path_buf(),
                        source,
                    })?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url, path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req
            .header("x-api-key", self.settings.api_key.expose_secret())
            .header("Organization", &self.settings.organization_uid);
        match &self.session_token {
            Some(token) => req.header("Authorization", format!("JWT {}", token.expose_secret())),
            None => req,
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, EncouraError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(EncouraError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn write_body(response: &mut Response, path: &Path) -> Result<u64, EncouraError> {
    let write_err = |source: std::io::Error| EncouraError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(path).await.map_err(write_err)?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        if chunk.is_empty() {
            continue;
        }
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
