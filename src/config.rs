//! TOML configuration.
//!
//! Every table except `[storage]` is optional and falls back to the
//! defaults below. [`load_config`] parses and validates the file; an
//! invalid file is rejected before any pipeline component is built.
//!
//! ```toml
//! [storage]
//! path = "./data/sakiyomi.sqlite"
//!
//! [chunking]
//! max_chars = 1000
//! overlap_chars = 100
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [index]
//! provider = "pinecone"
//!
//! [llm.GPT-4o]
//! kind = "openai"
//! model = "gpt-4o"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::Namespace;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default = "default_llms")]
    pub llm: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub tracing: TracingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Passages retrieved per namespace for script generation.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Passages retrieved from the past-plot namespace for title ideas.
    #[serde(default = "default_title_top_k")]
    pub title_top_k: usize,
    /// Namespaces queried, in order, by script generation.
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            title_top_k: default_title_top_k(),
            namespaces: default_namespaces(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_title_top_k() -> usize {
    10
}
fn default_namespaces() -> Vec<String> {
    Namespace::all()
        .iter()
        .map(|n| n.as_str().to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// OpenAI-compatible base URL; defaults to the public OpenAI API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `pinecone` or `memory`.
    #[serde(default = "default_index_provider")]
    pub provider: String,
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            control_url: default_control_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_provider() -> String {
    "pinecone".to_string()
}
fn default_control_url() -> String {
    "https://api.pinecone.io".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    /// Domains that are never fetched. Subdomains match too.
    #[serde(default = "default_blocked_domains")]
    pub blocked_domains: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            blocked_domains: default_blocked_domains(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_blocked_domains() -> Vec<String> {
    ["instagram.com", "facebook.com", "x.com", "twitter.com", "tiktok.com"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_user_agent() -> String {
    concat!("sakiyomi/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_max_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Wire protocol: `openai` (chat completions) or `anthropic` (messages).
    pub kind: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_llms() -> BTreeMap<String, LlmConfig> {
    let mut llms = BTreeMap::new();
    llms.insert(
        "GPT-4o".to_string(),
        LlmConfig {
            kind: "openai".to_string(),
            model: "gpt-4o".to_string(),
            url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        },
    );
    llms.insert(
        "Claude3".to_string(),
        LlmConfig {
            kind: "anthropic".to_string(),
            model: "claude-3-opus-20240229".to_string(),
            url: None,
            api_key_env: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        },
    );
    llms
}

#[derive(Debug, Deserialize, Clone)]
pub struct TracingConfig {
    /// `langsmith` or `disabled`.
    #[serde(default = "default_tracing_provider")]
    pub provider: String,
    #[serde(default = "default_tracing_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_tracing_key_env")]
    pub api_key_env: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            provider: default_tracing_provider(),
            endpoint: default_tracing_endpoint(),
            api_key_env: default_tracing_key_env(),
        }
    }
}

fn default_tracing_provider() -> String {
    "disabled".to_string()
}
fn default_tracing_endpoint() -> String {
    "https://api.smith.langchain.com".to_string()
}
fn default_tracing_key_env() -> String {
    "LANGCHAIN_API_KEY".to_string()
}

impl Config {
    /// Configuration with every optional table at its default.
    pub fn minimal(storage_path: PathBuf) -> Self {
        Self {
            storage: StorageConfig { path: storage_path },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            loader: LoaderConfig::default(),
            llm: default_llms(),
            tracing: TracingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    if config.retrieval.top_k == 0 || config.retrieval.title_top_k == 0 {
        bail!("retrieval.top_k and retrieval.title_top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or hash.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider == "openai" && config.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'openai'");
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.index.provider.as_str() {
        "pinecone" | "memory" => {}
        other => bail!(
            "Unknown index provider: '{}'. Must be pinecone or memory.",
            other
        ),
    }

    for (name, llm) in &config.llm {
        match llm.kind.as_str() {
            "openai" | "anthropic" => {}
            other => bail!(
                "llm.{}: unknown kind '{}'. Must be openai or anthropic.",
                name,
                other
            ),
        }
    }

    match config.tracing.provider.as_str() {
        "disabled" | "langsmith" => {}
        other => bail!(
            "Unknown tracing provider: '{}'. Must be disabled or langsmith.",
            other
        ),
    }

    Ok(())
}
