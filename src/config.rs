//! Configuração do relay carregada de `encoura-relay.toml` e do ambiente.
//!
//! A struct [`RelayConfig`] é montada uma única vez em `main` e passada por
//! referência para cada componente. Variáveis de ambiente têm precedência
//! sobre o arquivo; segredos ficam em [`SecretString`] e nunca aparecem
//! na saída de `Debug`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Caminho padrão do arquivo de configuração, relativo ao diretório atual.
pub const DEFAULT_CONFIG_PATH: &str = "encoura-relay.toml";

const DEFAULT_API_URL: &str = "https://api-datalab.encoura.org/v1";
const DEFAULT_SFTP_HOST: &str = "ft.technolutions.net";
const DEFAULT_SFTP_PORT: u16 = 22;
const DEFAULT_REMOTE_DIR: &str = "/incoming/Encoura API Uploads";
const DEFAULT_LOG_FILE: &str = "encoura-relay.log";
const DEFAULT_UPLOAD_EXTENSION: &str = "csv";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Configuração completa e validada de uma execução.
#[derive(Debug)]
pub struct RelayConfig {
    pub api: ApiSettings,
    pub sftp: SftpSettings,
    pub paths: PathSettings,
}

/// Acesso à API Encoura Data Lab.
#[derive(Debug)]
pub struct ApiSettings {
    /// URL base, sem barra final (ex.: `https://api-datalab.encoura.org/v1`).
    pub base_url: String,
    /// Valor do cabeçalho `x-api-key`.
    pub api_key: SecretString,
    /// Valor do cabeçalho `Organization`.
    pub organization_uid: String,
    pub username: String,
    pub password: SecretString,
    /// Timeout total de cada requisição HTTP.
    pub timeout: Duration,
}

/// Destino SFTP dos arquivos exportados.
#[derive(Debug)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Diretório remoto que recebe os uploads.
    pub remote_dir: String,
    /// Fingerprint SHA-256 esperado da chave do servidor (`SHA256:...`).
    /// Quando ausente, qualquer chave é aceita.
    pub host_key_fingerprint: Option<String>,
}

/// Caminhos locais.
#[derive(Debug)]
pub struct PathSettings {
    /// Diretório de staging dos downloads.
    pub download_dir: PathBuf,
    /// Arquivo de log da execução.
    pub log_file: PathBuf,
    /// Extensão (sem ponto) dos arquivos candidatos ao upload.
    pub upload_extension: String,
}

// Forma do arquivo TOML: tudo opcional, a validação acontece depois da
// sobreposição com o ambiente.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    api: ApiFile,
    sftp: SftpFile,
    paths: PathsFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiFile {
    base_url: Option<String>,
    api_key: Option<String>,
    organization_uid: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SftpFile {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    remote_dir: Option<String>,
    host_key_fingerprint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PathsFile {
    download_dir: Option<PathBuf>,
    log_file: Option<PathBuf>,
    upload_extension: Option<String>,
}

impl RelayConfig {
    /// Carrega o arquivo apontado por `ENCOURA_RELAY_CONFIG` (ou
    /// [`DEFAULT_CONFIG_PATH`]) e aplica as variáveis do processo por cima.
    /// O arquivo é opcional.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ENCOURA_RELAY_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let contents = if Path::new(&path).exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Some(text)
        } else {
            None
        };

        Self::from_sources(contents.as_deref(), |name| std::env::var(name).ok())
    }

    /// Monta a configuração a partir do conteúdo TOML (se houver) e de uma
    /// função de consulta ao ambiente.
    pub fn from_sources(
        toml_src: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = match toml_src {
            Some(src) => toml::from_str::<FileConfig>(src)?,
            None => FileConfig::default(),
        };
        let var = |name: &str| env(name).filter(|v| !v.is_empty());

        let api = ApiSettings {
            base_url: var("ENCOURA_API_URL")
                .or(file.api.base_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: require(var("ENCOURA_API_KEY").or(file.api.api_key), "ENCOURA_API_KEY")?
                .into(),
            organization_uid: require(
                var("ENCOURA_ORGANIZATION_UID").or(file.api.organization_uid),
                "ENCOURA_ORGANIZATION_UID",
            )?,
            username: require(var("ENCOURA_USERNAME").or(file.api.username), "ENCOURA_USERNAME")?,
            password: require(var("ENCOURA_PASSWORD").or(file.api.password), "ENCOURA_PASSWORD")?
                .into(),
            timeout: Duration::from_secs(file.api.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };

        let port = match var("SLATE_SFTP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "SLATE_SFTP_PORT",
                reason: e.to_string(),
            })?,
            None => file.sftp.port.unwrap_or(DEFAULT_SFTP_PORT),
        };

        let sftp = SftpSettings {
            host: var("SLATE_SFTP_HOST")
                .or(file.sftp.host)
                .unwrap_or_else(|| DEFAULT_SFTP_HOST.to_string()),
            port,
            username: require(
                var("SLATE_HALIA_SFTP_UN").or(file.sftp.username),
                "SLATE_HALIA_SFTP_UN",
            )?,
            password: require(
                var("SLATE_HALIA_SFTP_PW").or(file.sftp.password),
                "SLATE_HALIA_SFTP_PW",
            )?
            .into(),
            remote_dir: file
                .sftp
                .remote_dir
                .unwrap_or_else(|| DEFAULT_REMOTE_DIR.to_string()),
            host_key_fingerprint: var("SLATE_SFTP_HOST_KEY").or(file.sftp.host_key_fingerprint),
        };

        let upload_extension = file
            .paths
            .upload_extension
            .unwrap_or_else(|| DEFAULT_UPLOAD_EXTENSION.to_string())
            .trim_start_matches('.')
            .to_string();
        if upload_extension.is_empty() {
            return Err(ConfigError::Invalid {
                name: "paths.upload_extension",
                reason: "must not be empty".into(),
            });
        }

        let paths = PathSettings {
            download_dir: var("ENCOURA_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .or(file.paths.download_dir)
                .ok_or(ConfigError::Missing("ENCOURA_DOWNLOAD_DIR"))?,
            log_file: var("ENCOURA_LOG_FILE")
                .map(PathBuf::from)
                .or(file.paths.log_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            upload_extension,
        };

        Ok(Self { api, sftp, paths })
    }
}

fn require(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn required_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ENCOURA_API_KEY", "key-123"),
            ("ENCOURA_ORGANIZATION_UID", "org-1"),
            ("ENCOURA_USERNAME", "api-user"),
            ("ENCOURA_PASSWORD", "api-pass"),
            ("SLATE_HALIA_SFTP_UN", "sftp-user"),
            ("SLATE_HALIA_SFTP_PW", "sftp-pass"),
            ("ENCOURA_DOWNLOAD_DIR", "/var/spool/encoura"),
        ]
    }

    #[test]
    fn defaults_applied_with_env_only() {
        let config = RelayConfig::from_sources(None, env_from(&required_env())).unwrap();
        assert_eq!(config.api.base_url, "https://api-datalab.encoura.org/v1");
        assert_eq!(config.api.api_key.expose_secret(), "key-123");
        assert_eq!(config.api.organization_uid, "org-1");
        assert_eq!(config.api.timeout, Duration::from_secs(300));
        assert_eq!(config.sftp.host, "ft.technolutions.net");
        assert_eq!(config.sftp.port, 22);
        assert_eq!(config.sftp.remote_dir, "/incoming/Encoura API Uploads");
        assert!(config.sftp.host_key_fingerprint.is_none());
        assert_eq!(config.paths.download_dir, PathBuf::from("/var/spool/encoura"));
        assert_eq!(config.paths.log_file, PathBuf::from("encoura-relay.log"));
        assert_eq!(config.paths.upload_extension, "csv");
    }

    #[test]
    fn missing_secret_is_reported_by_env_name() {
        let env: Vec<_> = required_env()
            .into_iter()
            .filter(|(k, _)| *k != "SLATE_HALIA_SFTP_PW")
            .collect();
        let err = RelayConfig::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SLATE_HALIA_SFTP_PW")));
    }

    #[test]
    fn empty_env_value_counts_as_unset() {
        let mut env = required_env();
        env.retain(|(k, _)| *k != "ENCOURA_API_KEY");
        env.push(("ENCOURA_API_KEY", ""));
        let err = RelayConfig::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ENCOURA_API_KEY")));
    }

    #[test]
    fn file_values_fill_gaps() {
        let toml_str = r#"
            [api]
            api_key = "file-key"
            organization_uid = "file-org"
            username = "file-user"
            password = "file-pass"
            timeout_secs = 60

            [sftp]
            port = 2222
            username = "file-sftp"
            password = "file-sftp-pass"
            remote_dir = "/drop"

            [paths]
            download_dir = "/data/in"
            upload_extension = ".txt"
        "#;
        let config = RelayConfig::from_sources(Some(toml_str), env_from(&[])).unwrap();
        assert_eq!(config.api.api_key.expose_secret(), "file-key");
        assert_eq!(config.api.timeout, Duration::from_secs(60));
        assert_eq!(config.sftp.port, 2222);
        assert_eq!(config.sftp.remote_dir, "/drop");
        assert_eq!(config.paths.download_dir, PathBuf::from("/data/in"));
        assert_eq!(config.paths.upload_extension, "txt");
    }

    #[test]
    fn env_takes_precedence_over_file() {
        let toml_str = r#"
            [api]
            api_key = "file-key"
            base_url = "https://file.example/v1/"
        "#;
        let mut env = required_env();
        env.push(("ENCOURA_API_URL", "http://127.0.0.1:9000/"));
        let config = RelayConfig::from_sources(Some(toml_str), env_from(&env)).unwrap();
        assert_eq!(config.api.api_key.expose_secret(), "key-123");
        assert_eq!(config.api.base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut env = required_env();
        env.push(("SLATE_SFTP_PORT", "ssh"));
        let err = RelayConfig::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "SLATE_SFTP_PORT",
                ..
            }
        ));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = RelayConfig::from_sources(Some("[api"), env_from(&required_env())).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = RelayConfig::from_sources(None, env_from(&required_env())).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("api-pass"));
        assert!(!debug.contains("sftp-pass"));
        assert!(!debug.contains("key-123"));
    }
}
