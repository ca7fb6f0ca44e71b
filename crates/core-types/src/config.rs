//! TOML-backed application configuration.
//!
//! Resolution order for the config file: explicit path, then
//! `$KGSEARCH_CONFIG`, then `config/kgsearch.toml`. A missing file is created
//! with defaults so a fresh checkout can start the service immediately.
//! Environment overrides are applied after the file is parsed.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::EmbeddingKind;

pub const CONFIG_ENV: &str = "KGSEARCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/kgsearch.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub artifacts: ArtifactsConfig,
    pub index: IndexConfig,
    pub server: ServerConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub data_dir: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
        }
    }
}

/// Locations of the four training artifacts (DGL-KE layout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub embeddings_dir: String,
    pub entity_matrix: String,
    pub relation_matrix: String,
    pub mappings_dir: String,
    pub entity_ids: String,
    pub relation_ids: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            embeddings_dir: "data/processed/final_model_dglke".into(),
            entity_matrix: "entity.npy".into(),
            relation_matrix: "relation.npy".into(),
            mappings_dir: "data/processed/final_model_dglke".into(),
            entity_ids: "entities.tsv".into(),
            relation_ids: "relations.tsv".into(),
        }
    }
}

impl ArtifactsConfig {
    pub fn entity_matrix_path(&self) -> PathBuf {
        Path::new(&self.embeddings_dir).join(&self.entity_matrix)
    }

    pub fn relation_matrix_path(&self) -> PathBuf {
        Path::new(&self.embeddings_dir).join(&self.relation_matrix)
    }

    pub fn entity_ids_path(&self) -> PathBuf {
        Path::new(&self.mappings_dir).join(&self.entity_ids)
    }

    pub fn relation_ids_path(&self) -> PathBuf {
        Path::new(&self.mappings_dir).join(&self.relation_ids)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// `"entities"` or `"relations"`; validated when the index is built.
    pub mode: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingKind::Entities.as_str().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".into(),
            max_message_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_k: usize,
    pub max_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            max_k: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Optional log file; rotated daily when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Parse a config from TOML text. Missing sections fall back to defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parse config toml")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serialize config toml")
    }

    /// Apply `KGSEARCH_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("KGSEARCH_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(level) = lookup("KGSEARCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("KGSEARCH_MODEL_DIR") {
            self.artifacts.embeddings_dir.clone_from(&dir);
            self.artifacts.mappings_dir = dir;
        }
        if let Some(mode) = lookup("KGSEARCH_INDEX_MODE") {
            self.index.mode = mode;
        }
    }

    /// Reject values that would only fail later at request time.
    pub fn validate(&self) -> Result<()> {
        if self.search.default_k == 0 {
            bail!("search.default_k must be at least 1");
        }
        if self.search.default_k > self.search.max_k {
            bail!(
                "search.default_k ({}) exceeds search.max_k ({})",
                self.search.default_k,
                self.search.max_k
            );
        }
        if self.server.max_message_bytes < 1024 {
            bail!(
                "server.max_message_bytes must be at least 1024, got {}",
                self.server.max_message_bytes
            );
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .with_context(|| format!("invalid server.listen_addr {:?}", self.server.listen_addr))
    }
}

/// Resolve the config path without touching the filesystem.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the config at the resolved path, writing defaults first if it does not exist.
pub fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = resolve_config_path(explicit);
    let mut cfg = if path.exists() {
        let text =
            fs::read_to_string(&path).with_context(|| format!("read config {}", path.display()))?;
        AppConfig::from_toml_str(&text).with_context(|| format!("load {}", path.display()))?
    } else {
        let cfg = AppConfig::default();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        fs::write(&path, cfg.to_toml_string()?)
            .with_context(|| format!("write default config {}", path.display()))?;
        cfg
    };
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}
