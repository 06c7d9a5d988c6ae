//! Nomes de arquivo seguros para o diretório de staging.
//!
//! As URLs de download vêm da API do fornecedor e não são confiáveis:
//! o último segmento do caminho é decodificado e reduzido ao conjunto
//! `[A-Za-z0-9_.-]` antes de virar um nome de arquivo local.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("valid regex"));

/// Remove espaços nas pontas, troca espaços internos por `_` e descarta
/// qualquer caractere fora de `[A-Za-z0-9_.-]`.
pub fn sanitize_file_name(s: &str) -> String {
    let underscored = s.trim().replace(' ', "_");
    UNSAFE_CHARS.replace_all(&underscored, "").into_owned()
}

/// Extrai o nome de arquivo (basename decodificado e sanitizado) de uma URL.
///
/// Retorna `None` quando não sobra nada utilizável, incluindo nomes
/// compostos apenas de pontos (`.`, `..`).
pub fn file_name_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let segment = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(segment).ok()?;
    usable(sanitize_file_name(&decoded))
}

fn usable(name: String) -> Option<String> {
    if name.chars().all(|c| c == '.') {
        None
    } else {
        Some(name)
    }
}

/// Per-run registry of staged file names.
///
/// Two different URLs may sanitize to the same name. The first one keeps
/// it; later ones get a short hash of their URL appended to the stem.
#[derive(Debug, Default)]
pub struct StagedNames {
    // nome -> URL que o reservou
    taken: HashMap<String, String>,
}

impl StagedNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a local name for `url`, falling back to `<uid>.csv` when the
    /// URL carries no usable basename.
    pub fn assign(&mut self, url: &str, uid: &str) -> String {
        let base = file_name_from_url(url)
            .or_else(|| usable(sanitize_file_name(uid)).map(|stem| format!("{stem}.csv")))
            .unwrap_or_else(|| format!("export-{}.csv", short_hash(url)));

        let name = match self.taken.get(&base) {
            Some(owner) if owner != url => with_suffix(&base, &short_hash(url)),
            _ => base,
        };
        self.taken.insert(name.clone(), url.to_string());
        name
    }
}

fn short_hash(input: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    digest[..8].to_string()
}

// `My_File.csv` + `1a2b3c4d` -> `My_File-1a2b3c4d.csv`
fn with_suffix(name: &str, suffix: &str) -> String {
    match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{}-{suffix}{}", &name[..idx], &name[idx..]),
        _ => format!("{name}-{suffix}"),
    }
}
