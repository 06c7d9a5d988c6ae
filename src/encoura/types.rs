//! Tipos de dados das requisições e respostas da API Encoura Data Lab.
//!
//! Os nomes de campo seguem o JSON da API em camelCase (`userName`,
//! `sessionToken`, `downloadUrl`).

use serde::{Deserialize, Serialize};

use super::error::EncouraError;

/// Corpo do `POST /login`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    pub user_name: &'a str,
    pub password: &'a str,
    /// A API exige o aceite explícito dos termos de uso.
    pub accepted_terms: bool,
}

/// Resposta do login. Qualquer outro campo é ignorado.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub session_token: Option<String>,
}

/// Um item de `GET /datacenter/exports`. O filtro por `status` é feito
/// pela própria API; só o `uid` interessa aqui.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExportDescriptor {
    pub uid: Option<String>,
}

/// Resposta de `GET /datacenter/exports/{uid}/download`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadLink {
    pub download_url: Option<String>,
}

/// Um export já resolvido para uma URL de download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExport {
    pub uid: String,
    pub download_url: String,
}

/// Why a listed export could not be queued for download.
#[derive(Debug)]
pub enum SkipReason {
    MissingUid,
    MissingDownloadUrl,
    Resolve(EncouraError),
}

#[derive(Debug)]
pub struct SkippedExport {
    pub uid: Option<String>,
    pub reason: SkipReason,
}

/// Resultado de [`list_pending_exports`](super::EncouraClient::list_pending_exports).
#[derive(Debug, Default)]
pub struct ExportListing {
    pub ready: Vec<PendingExport>,
    pub skipped: Vec<SkippedExport>,
}
