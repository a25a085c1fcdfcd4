//! Configuration loading.
//!
//! Everything lives in one TOML file (default `./config/partselect.toml`).
//! The scope contract and source policy are separate versioned artifacts
//! referenced from `[policy]`; they are read once by
//! [`Engine::from_config`](crate::pipeline::Engine::from_config) and never
//! reloaded.
//!
//! Secrets are never read from the file: `OPENAI_API_KEY` and
//! `SERPAPI_API_KEY` come from the environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    pub policy: PolicyConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Upper bound on a single store query issued while answering.
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Leading characters of the message used as the query text.
    #[serde(default = "default_query_chars")]
    pub query_chars: usize,
    #[serde(default = "default_min_results")]
    pub min_results_before_expansion: usize,
    /// Claims kept by the extractive composer.
    #[serde(default = "default_max_claims")]
    pub max_claims: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            query_chars: default_query_chars(),
            min_results_before_expansion: default_min_results(),
            max_claims: default_max_claims(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_query_chars() -> usize {
    100
}
fn default_min_results() -> usize {
    2
}
fn default_max_claims() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
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

/// Chat-completion model used for the scope fallback, the planner and the
/// claim writer.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    15
}
fn default_max_tokens() -> u32 {
    600
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    /// `rules` or `planner`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
        }
    }
}

fn default_strategy() -> String {
    "rules".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_discovery_max_results")]
    pub max_results: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_discovery_timeout_secs(),
            max_results: default_discovery_max_results(),
        }
    }
}

fn default_discovery_timeout_secs() -> u64 {
    15
}
fn default_discovery_max_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Lifetime of cached part/model lookups. `0` disables the cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum entries per cached lookup kind.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    pub scope_contract: PathBuf,
    pub source_policy: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Per-capability time limits, derived from the config sections.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub llm: Duration,
    pub embedding: Duration,
    pub discovery: Duration,
    pub store: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            llm: Duration::from_secs(default_llm_timeout_secs()),
            embedding: Duration::from_secs(default_timeout_secs()),
            discovery: Duration::from_secs(default_discovery_timeout_secs()),
            store: Duration::from_secs(default_store_timeout_secs()),
        }
    }
}

impl Config {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            llm: Duration::from_secs(self.llm.timeout_secs),
            embedding: Duration::from_secs(self.embedding.timeout_secs),
            discovery: Duration::from_secs(self.discovery.timeout_secs),
            store: Duration::from_secs(self.db.timeout_secs),
        }
    }
}

/// Read, parse and validate the config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks shared by [`load_config`] and configs built in code.
pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.query_chars == 0 {
        anyhow::bail!("retrieval.query_chars must be >= 1");
    }

    if config.catalog.cache_ttl_secs > 0 && config.catalog.cache_capacity == 0 {
        anyhow::bail!("catalog.cache_capacity must be >= 1 when the cache is enabled");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or hashing.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.router.strategy.as_str() {
        "rules" => {}
        "planner" if config.llm.is_enabled() => {}
        "planner" => anyhow::bail!("router.strategy = 'planner' requires an llm provider"),
        other => anyhow::bail!(
            "Unknown router strategy: '{}'. Must be rules or planner.",
            other
        ),
    }

    match config.discovery.provider.as_str() {
        "disabled" | "serpapi" => {}
        other => anyhow::bail!(
            "Unknown discovery provider: '{}'. Must be disabled or serpapi.",
            other
        ),
    }

    Ok(())
}
