//! Bot configuration loading and defaults.
//!
//! A YAML file can override any field; every field has a production default
//! so `BotConfig::default()` is a fully working configuration. API keys are
//! resolved from the environment at client construction, never stored here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;

// ─── Memory ─────────────────────────────────────────────────────────────────

/// Limits governing per-thread conversation memory.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Hard cap on retained messages per thread.
    #[serde(default = "default_max_messages")]
    pub max_messages_per_thread: usize,
    /// Target ceiling for estimated tokens before compression.
    #[serde(default = "default_max_tokens")]
    pub max_conversation_tokens: usize,
    /// Fraction of the ceiling at which compression fires.
    #[serde(default = "default_trigger_ratio")]
    pub compression_trigger_ratio: f64,
    /// Recent messages kept verbatim through compression.
    #[serde(default = "default_keep_recent")]
    pub keep_recent_messages: usize,
    /// Query Record ring size per thread.
    #[serde(default = "default_max_queries")]
    pub max_queries_per_thread: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages_per_thread: default_max_messages(),
            max_conversation_tokens: default_max_tokens(),
            compression_trigger_ratio: default_trigger_ratio(),
            keep_recent_messages: default_keep_recent(),
            max_queries_per_thread: default_max_queries(),
        }
    }
}

fn default_max_messages() -> usize {
    10
}
fn default_max_tokens() -> usize {
    4000
}
fn default_trigger_ratio() -> f64 {
    0.8
}
fn default_keep_recent() -> usize {
    5
}
fn default_max_queries() -> usize {
    10
}

// ─── LLM ────────────────────────────────────────────────────────────────────

/// Settings for the OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL up to (and excluding) `/chat/completions`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier sent in the request body.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens per completion.
    #[serde(default = "default_max_completion_tokens")]
    pub max_tokens: u32,
    /// Environment variable holding the API key. Empty means no auth header.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_completion_tokens(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_completion_tokens() -> u32 {
    1024
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

// ─── BotConfig ──────────────────────────────────────────────────────────────

/// Top-level process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Max tool-loop iterations per agent run.
    #[serde(default = "default_agent_step_limit")]
    pub agent_step_limit: usize,
    /// Wall-clock timeout per inbound message, in seconds.
    #[serde(default = "default_message_timeout_s")]
    pub message_timeout_s: u64,
    /// Required table identifier for the SQL validator.
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Path to the read-only SQLite database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Directory for generated CSV exports. Defaults to the system temp dir.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            llm: LlmConfig::default(),
            agent_step_limit: default_agent_step_limit(),
            message_timeout_s: default_message_timeout_s(),
            table_name: default_table_name(),
            database_path: default_database_path(),
            export_dir: default_export_dir(),
        }
    }
}

fn default_agent_step_limit() -> usize {
    10
}
fn default_message_timeout_s() -> u64 {
    60
}
fn default_table_name() -> String {
    "app_portfolio".to_string()
}
fn default_database_path() -> PathBuf {
    PathBuf::from("data/app_portfolio.db")
}
fn default_export_dir() -> PathBuf {
    std::env::temp_dir()
}

impl BotConfig {
    /// Load configuration from a YAML file, falling back to defaults for any
    /// missing field.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: BotConfig = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.memory.compression_trigger_ratio) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "compression_trigger_ratio must be in [0, 1], got {}",
                    self.memory.compression_trigger_ratio
                ),
            });
        }
        if self.memory.keep_recent_messages > self.memory.max_messages_per_thread {
            return Err(ConfigError::Invalid {
                reason: "keep_recent_messages cannot exceed max_messages_per_thread".into(),
            });
        }
        if self.table_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "table_name must not be empty".into(),
            });
        }
        Ok(())
    }

    /// The per-message processing deadline.
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_s)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
