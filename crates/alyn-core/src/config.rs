use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AlynError, Result};

pub const DEFAULT_PORT: u16 = 18850;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (alyn.toml + ALYN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlynConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat-completions endpoint, no trailing slash.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Model driving the top-level interaction agent.
    #[serde(default = "default_interaction_model")]
    pub interaction_model: String,
    /// Model driving execution agents.
    #[serde(default = "default_execution_model")]
    pub execution_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the conversation log, agent journals, roster,
    /// and SQLite databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_dedup_window")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot API token. Outbound Telegram delivery is disabled when unset.
    #[serde(default)]
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// IANA timezone used for log timestamps and trigger recurrence.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl AlynConfig {
    /// Load from `path` (optional) merged with `ALYN_*` environment
    /// variables. Env vars use `__` as the section separator, e.g.
    /// `ALYN_LLM__API_KEY`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("ALYN_").split("__"))
            .extract()
            .map_err(|e| AlynError::Config(e.to_string()))
    }

    /// Parse the configured timezone, falling back to UTC with a warning
    /// when the name is not a known IANA zone.
    pub fn user_timezone(&self) -> Tz {
        match self.user.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(timezone = %self.user.timezone, "unknown timezone, falling back to UTC");
                Tz::UTC
            }
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            interaction_model: default_interaction_model(),
            execution_model: default_execution_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cache_size: default_dedup_cache_size(),
            window_secs: default_dedup_window(),
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api".to_string()
}

fn default_interaction_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_execution_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_poll_interval() -> u64 {
    10
}

fn default_dedup_cache_size() -> usize {
    100
}

fn default_dedup_window() -> u64 {
    60
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = AlynConfig::default();
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.dedup.cache_size, 100);
        assert_eq!(config.dedup.window_secs, 60);
        assert_eq!(config.user.timezone, "UTC");
        assert!(config.telegram.bot_token.is_none());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = AlynConfig::load(None).unwrap();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alyn.toml");
        std::fs::write(
            &path,
            "[scheduler]\npoll_interval_secs = 3\n\n[user]\ntimezone = \"Europe/Paris\"\n",
        )
        .unwrap();
        let config = AlynConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 3);
        assert_eq!(config.user_timezone(), chrono_tz::Europe::Paris);
    }

    #[test]
    fn bad_timezone_falls_back_to_utc() {
        let mut config = AlynConfig::default();
        config.user.timezone = "Mars/Olympus".to_string();
        assert_eq!(config.user_timezone(), chrono_tz::Tz::UTC);
    }
}
