use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_LLM_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-3.5-turbo";

/// Settings of the completion endpoint used by the explanation generator.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_LLM_API_BASE.into(),
            model: DEFAULT_LLM_MODEL.into(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Postgres URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Snapshot directory for the in-memory store.
    pub data_dir: Option<PathBuf>,
    pub grace_period: Duration,
    pub metrics_enabled: bool,
    pub stats_interval: Duration,
    pub llm: LlmConfig,
}

fn opt_env(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match opt_env(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {name}: '{raw}'")),
        None => Ok(default),
    }
}

fn bool_env(name: &str, default: bool) -> anyhow::Result<bool> {
    match opt_env(name) {
        Some(v) if v == "1" || v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v == "0" || v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => anyhow::bail!("invalid value for {name}: '{v}' (expected true/false)"),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_key: opt_env("LLM_API_KEY"),
            api_base: opt_env("LLM_API_BASE").unwrap_or(defaults.api_base),
            model: opt_env("LLM_MODEL").unwrap_or(defaults.model),
            temperature: parse_env("LLM_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_env("LLM_MAX_TOKENS", defaults.max_tokens)?,
            timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 60u64)?),
        };
        let stats_interval_secs: u64 = parse_env("STATS_INTERVAL_SECS", 60)?;
        if stats_interval_secs == 0 {
            anyhow::bail!("invalid value for STATS_INTERVAL_SECS: must be at least 1");
        }
        Ok(Self {
            host: opt_env("API_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_env("API_PORT", 8000u16)?,
            database_url: opt_env("DATABASE_URL"),
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 5u32)?,
            data_dir: opt_env("TOPICS_DATA_DIR").map(PathBuf::from),
            grace_period: Duration::from_millis(parse_env("CONSUME_GRACE_MS", 3000u64)?),
            metrics_enabled: bool_env("METRICS_ENABLED", true)?,
            stats_interval: Duration::from_secs(stats_interval_secs),
            llm,
        })
    }
}
