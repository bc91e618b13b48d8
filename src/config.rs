// src/config.rs

use std::{env, net::SocketAddr, str::FromStr};

use dotenvy::dotenv;
use thiserror::Error;
use url::Url;

/// Number of option slots always reported in per-question answer stats.
pub const STATS_OPTION_SLOTS: usize = 4;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

pub const DEFAULT_QUIZ_SIZE: i64 = 15;
pub const MAX_QUIZ_SIZE: i64 = 50;

const DEFAULT_AI_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_AI_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Settings for the external reasoning service used to enrich questions.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Bearer token. When unset every enrichment call fails as a transport error.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Extra attempts after a retryable failure (network, timeout, 5xx, 429).
    pub max_retries: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_AI_BASE_URL.to_string(),
            model: DEFAULT_AI_MODEL.to_string(),
            timeout_secs: 30,
            max_retries: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub log_dir: String,
    pub bind_addr: SocketAddr,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub ai: AiConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let jwt_expiration = parsed("JWT_EXPIRATION", 86_400)?;
        let rust_log = optional("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let log_dir = optional("LOG_DIR").unwrap_or_else(|| "logs".to_string());
        let bind_addr = parsed("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let ai_defaults = AiConfig::default();
        let base_url = optional("AI_BASE_URL").unwrap_or(ai_defaults.base_url);
        Url::parse(&base_url).map_err(|e| ConfigError::Invalid {
            name: "AI_BASE_URL",
            reason: e.to_string(),
        })?;

        let ai = AiConfig {
            api_key: optional("AI_API_KEY"),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: optional("AI_MODEL").unwrap_or(ai_defaults.model),
            timeout_secs: parsed("AI_TIMEOUT_SECS", ai_defaults.timeout_secs)?,
            max_retries: parsed("AI_MAX_RETRIES", ai_defaults.max_retries)?,
        };

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            log_dir,
            bind_addr,
            admin_username: optional("ADMIN_USERNAME"),
            admin_password: optional("ADMIN_PASSWORD"),
            ai,
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
