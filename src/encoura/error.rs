//! Tipos de erro para o cliente da API Encoura.
//!
//! Define [`EncouraError`] com variantes para erros HTTP da API, login sem
//! token de sessão, falhas de rede e falhas de escrita no disco local.

use std::path::PathBuf;

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API Encoura ou ao baixar um
/// arquivo exportado.
#[derive(Debug, Error)]
pub enum EncouraError {
    /// A API (ou o host do download) respondeu com status diferente de 2xx.
    /// Contém o código HTTP e o corpo da resposta.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// O login respondeu 2xx mas sem `sessionToken` no corpo.
    #[error("couldn't find sessionToken in login response: {body}")]
    MissingSessionToken { body: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout, corpo inválido).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Falha ao gravar o arquivo baixado.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
