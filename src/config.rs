/// Configuration module for groundrag.
///
/// Handles loading, validating, and providing default configuration values.
/// Secrets and deployment-specific values can be supplied through the
/// environment instead of the JSON file.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RagError;

// ── Default value functions ──────────────────────────────────────────

fn default_documents_dir() -> String {
    "./data".to_string()
}

fn default_index_name() -> String {
    "docs".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_search_top_k() -> usize {
    4
}

fn default_max_concurrent_embeddings() -> usize {
    4
}

fn default_model_name() -> String {
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_embed_batch_size() -> usize {
    64
}

fn default_db_path() -> String {
    "./vectors.db".to_string()
}

fn default_api_version() -> String {
    "2023-11-01".to_string()
}

fn default_search_timeout_secs() -> u64 {
    30
}

fn default_llm_model() -> String {
    "phi-4-mini-instruct".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    800
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_addr() -> String {
    "127.0.0.1:8000".to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,

    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Records per embed + upload round during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    /// Combine the vector score with a lexical match on the question.
    #[serde(default)]
    pub hybrid_search: bool,

    /// Upper bound on embedding calls running at once in the servers.
    #[serde(default = "default_max_concurrent_embeddings")]
    pub max_concurrent_embeddings: usize,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    #[default]
    Onnx,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    /// Model identifier; must be the same for ingestion and retrieval.
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default)]
    pub backend: EmbedderBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            index_name: default_index_name(),
            batch_size: default_batch_size(),
            search_top_k: default_search_top_k(),
            hybrid_search: false,
            max_concurrent_embeddings: default_max_concurrent_embeddings(),
            model: ModelConfig::default(),
            index: IndexConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
            backend: EmbedderBackend::default(),
            model_dir: None,
            embed_batch_size: default_embed_batch_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            db_path: default_db_path(),
            endpoint: None,
            api_key: None,
            api_version: default_api_version(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file, then apply environment overrides.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        let mut cfg = if Path::new(path).exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {path}"))?;
            let cfg: Config = serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON in {path}"))?;
            info!("Loaded configuration from {path}");
            cfg
        } else {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }
            cfg
        };

        cfg.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Overlay values found through `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        // Short name first, then the name Azure deployments already export
        let search = |name: &str| get(name).or_else(|| get(&format!("AZURE_{name}")));

        if let Some(v) = search("SEARCH_ENDPOINT") {
            self.index.endpoint = Some(v);
        }
        if let Some(v) = search("SEARCH_ADMIN_KEY") {
            self.index.api_key = Some(v);
        }
        if let Some(v) = search("SEARCH_INDEX") {
            self.index_name = v;
        }
        if let Some(v) = get("EMBEDDER_MODEL_ID") {
            self.model.name = v;
        }
        if let Some(v) = get("LLM_ENDPOINT") {
            self.llm.endpoint = Some(v);
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("LLM_MODEL_NAME") {
            self.llm.model = v;
        }
    }

    /// Validate the settings needed for ingestion and retrieval.
    pub fn validate(&self) -> Result<(), RagError> {
        ensure(self.batch_size > 0, "batch_size must be positive")?;
        ensure(self.search_top_k > 0, "search_top_k must be positive")?;
        ensure(
            self.max_concurrent_embeddings > 0,
            "max_concurrent_embeddings must be positive",
        )?;
        ensure(self.model.dimensions > 0, "model.dimensions must be positive")?;
        ensure(
            self.model.embed_batch_size > 0,
            "model.embed_batch_size must be positive",
        )?;
        ensure(!self.model.name.trim().is_empty(), "model.name is required")?;
        crate::index::validate_index_name(&self.index_name)?;

        if self.index.backend == IndexBackend::Remote {
            ensure(
                self.index.endpoint.is_some(),
                "index.endpoint (or SEARCH_ENDPOINT) is required for the remote backend",
            )?;
            ensure(
                self.index.api_key.is_some(),
                "index.api_key (or SEARCH_ADMIN_KEY) is required for the remote backend",
            )?;
        }
        Ok(())
    }

    /// Validate the additional settings needed to answer questions.
    pub fn validate_for_answering(&self) -> Result<(), RagError> {
        self.validate()?;
        ensure(
            self.llm.endpoint.is_some(),
            "llm.endpoint (or LLM_ENDPOINT) is required",
        )?;
        ensure(
            self.llm.api_key.is_some(),
            "llm.api_key (or LLM_API_KEY) is required",
        )?;
        Ok(())
    }
}

impl IndexConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LlmConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), RagError> {
    if condition {
        Ok(())
    } else {
        Err(RagError::config(message))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
