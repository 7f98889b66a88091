//! Configuration loaded from a TOML file.
//!
//! Only `[storage]` is required; every other section falls back to the
//! defaults below. [`parse_config`] validates after deserializing, so a
//! returned [`Config`] is always usable.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{AdvisorError, Result};

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
    pub llm: LlmConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per user.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    4000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_token_budget: default_context_token_budget(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_context_token_budget() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
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

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            url: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    120
}

/// Readiness heuristic parameters for contract recommendations.
#[derive(Debug, Deserialize, Clone)]
pub struct AdvisorConfig {
    #[serde(default = "default_readiness_keywords")]
    pub readiness_keywords: Vec<String>,
    #[serde(default = "default_readiness_marker")]
    pub readiness_marker: String,
    #[serde(default = "default_min_keyword_hits")]
    pub min_keyword_hits: usize,
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            readiness_keywords: default_readiness_keywords(),
            readiness_marker: default_readiness_marker(),
            min_keyword_hits: default_min_keyword_hits(),
            min_messages: default_min_messages(),
        }
    }
}

fn default_readiness_keywords() -> Vec<String> {
    ["subject matter", "terms", "parties", "obligations", "payment"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_readiness_marker() -> String {
    "I believe I now have enough information".to_string()
}
fn default_min_keyword_hits() -> usize {
    4
}
fn default_min_messages() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnalysisConfig {
    /// Questions answered by the QA capability for every analyzed document.
    #[serde(default)]
    pub questions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_max_sessions() -> usize {
    256
}

impl Config {
    /// Config with every section at its default and storage under `root`.
    pub fn minimal_at(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig { root: root.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            advisor: AdvisorConfig::default(),
            analysis: AnalysisConfig::default(),
            sessions: SessionsConfig::default(),
        }
    }

    pub fn minimal() -> Self {
        Self::minimal_at("./data/users")
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.size == 0 {
            return Err(config_err("chunking.size must be > 0"));
        }
        if self.chunking.overlap >= self.chunking.size {
            return Err(config_err(format!(
                "chunking.overlap ({}) must be < chunking.size ({})",
                self.chunking.overlap, self.chunking.size
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(config_err("retrieval.top_k must be >= 1"));
        }
        if self.retrieval.context_token_budget == 0 {
            return Err(config_err("retrieval.context_token_budget must be > 0"));
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(config_err(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                    other
                )))
            }
        }
        if matches!(self.embedding.provider.as_str(), "openai" | "ollama") {
            if self.embedding.model.is_none() {
                return Err(config_err(format!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                return Err(config_err(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                )));
            }
        }
        if self.embedding.batch_size == 0 {
            return Err(config_err("embedding.batch_size must be > 0"));
        }

        match self.llm.provider.as_str() {
            "openai" | "ollama" => {}
            other => {
                return Err(config_err(format!(
                    "Unknown llm provider: '{}'. Must be openai or ollama.",
                    other
                )))
            }
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(config_err("llm.temperature must be in [0.0, 2.0]"));
        }

        if self.advisor.readiness_marker.trim().is_empty() {
            return Err(config_err("advisor.readiness_marker must not be empty"));
        }
        if self.advisor.min_keyword_hits > self.advisor.readiness_keywords.len() {
            return Err(config_err(format!(
                "advisor.min_keyword_hits ({}) exceeds the number of readiness keywords ({})",
                self.advisor.min_keyword_hits,
                self.advisor.readiness_keywords.len()
            )));
        }

        if self.sessions.max_sessions == 0 {
            return Err(config_err("sessions.max_sessions must be >= 1"));
        }

        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> AdvisorError {
    AdvisorError::Configuration(msg.into())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        config_err(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| config_err(format!("Failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}
