//! Backend configuration from the environment

use super::find_model;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

/// Configuration for the completion backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API, without trailing `/chat/completions`
    pub base_url: String,
    /// Model selected for a fresh session
    pub default_model: Option<String>,
    /// Deadline for establishing a completion stream
    pub request_timeout: Duration,
    /// Longest silence tolerated between two events of an open stream
    pub stream_idle_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            stream_idle_timeout: Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("DEFAULT_MODEL `{0}` is not one of the selectable models")]
    UnknownModel(String),
    #[error("{var} must be a positive integer, got `{value}`")]
    InvalidTimeout { var: &'static str, value: String },
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let seconds = |var: &'static str, default: u64| match non_empty(var) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                _ => Err(ConfigError::InvalidTimeout { var, value: raw }),
            },
            None => Ok(Duration::from_secs(default)),
        };
        let request_timeout = seconds("HULT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let stream_idle_timeout =
            seconds("HULT_STREAM_IDLE_TIMEOUT_SECS", DEFAULT_STREAM_IDLE_TIMEOUT_SECS)?;

        let default_model = non_empty("DEFAULT_MODEL");
        if let Some(model) = &default_model {
            if find_model(model).is_none() {
                return Err(ConfigError::UnknownModel(model.clone()));
            }
        }

        Ok(Self {
            api_key: non_empty("OPENAI_API_KEY"),
            base_url: non_empty("OPENAI_BASE_URL")
                .map_or_else(|| DEFAULT_BASE_URL.to_string(), |u| u.trim_end_matches('/').to_string()),
            default_model,
            request_timeout,
            stream_idle_timeout,
        })
    }

    /// API key, or an error when calls cannot be authenticated
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }
}
