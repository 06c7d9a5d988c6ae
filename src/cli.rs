//! Interface de linha de comando do relay baseada em clap.
//!
//! Não há flags de comportamento: toda a configuração vem de
//! `encoura-relay.toml` e do ambiente (veja [`crate::config`]). A CLI só
//! existe para `--help` e `--version`.

use clap::Parser;

/// Baixa os exports pendentes da Encoura e os envia ao SFTP do Slate.
///
/// Variáveis obrigatórias: ENCOURA_API_KEY, ENCOURA_ORGANIZATION_UID,
/// ENCOURA_USERNAME, ENCOURA_PASSWORD, SLATE_HALIA_SFTP_UN,
/// SLATE_HALIA_SFTP_PW, ENCOURA_DOWNLOAD_DIR.
#[derive(Debug, Parser)]
#[command(name = "encoura-relay", version, about)]
pub struct Cli {}
