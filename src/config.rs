use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Hard ceiling on the repair-loop retry budget.
pub const MAX_REPAIR_RETRIES: u32 = 10;
/// Hard ceiling on document-search reframing rounds.
pub const MAX_REFRAMES: u32 = 3;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL of an OpenAI-compatible API (e.g. a local LM Studio or
    /// Ollama `/v1` endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_completion_retries(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_completion_retries() -> u32 {
    3
}
fn default_completion_timeout_secs() -> u64 {
    60
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
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
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
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
pub struct RepairConfig {
    #[serde(default = "default_repair_retries")]
    pub max_retries: u32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_retries: default_repair_retries(),
        }
    }
}

fn default_repair_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_table_k")]
    pub table_k: usize,
    #[serde(default = "default_max_reframes")]
    pub max_reframes: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            table_k: default_table_k(),
            max_reframes: default_max_reframes(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_table_k() -> usize {
    1
}
fn default_max_reframes() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// When false, SQL answers are the canonical row rendering instead of a
    /// model-written sentence.
    #[serde(default = "default_synthesize")]
    pub synthesize: bool,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            synthesize: default_synthesize(),
        }
    }
}

fn default_synthesize() -> bool {
    true
}

/// Fallback locations used when a request or CLI call leaves a path empty.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_table_descriptions_path")]
    pub table_descriptions_path: PathBuf,
    #[serde(default = "default_knowledge_pool_path")]
    pub knowledge_pool_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            table_descriptions_path: default_table_descriptions_path(),
            knowledge_pool_path: default_knowledge_pool_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("sql/facade_sql.db")
}
fn default_table_descriptions_path() -> PathBuf {
    PathBuf::from("knowledge/table_descriptions.json")
}
fn default_knowledge_pool_path() -> PathBuf {
    PathBuf::from("knowledge_pool/merged.json")
}

impl Config {
    /// Defaults only: providers disabled, default paths and budgets.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig::default(),
            completion: CompletionConfig::default(),
            embedding: EmbeddingConfig::default(),
            repair: RepairConfig::default(),
            retrieval: RetrievalConfig::default(),
            answer: AnswerConfig::default(),
            paths: PathsConfig::default(),
        }
    }

    /// Retry budget for the repair loop, clamped to [`MAX_REPAIR_RETRIES`].
    pub fn repair_budget(&self) -> u32 {
        self.repair.max_retries.min(MAX_REPAIR_RETRIES)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate repair budget
    if config.repair.max_retries > MAX_REPAIR_RETRIES {
        anyhow::bail!("repair.max_retries must be <= {}", MAX_REPAIR_RETRIES);
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.table_k == 0 {
        anyhow::bail!("retrieval.table_k must be >= 1");
    }
    if config.retrieval.max_reframes > MAX_REFRAMES {
        anyhow::bail!("retrieval.max_reframes must be <= {}", MAX_REFRAMES);
    }

    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("server.request_timeout_secs must be > 0");
    }

    // Validate completion
    match config.completion.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.completion.is_enabled() && config.completion.model.is_none() {
        anyhow::bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() && config.embedding.provider != "local" {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(config)
}
