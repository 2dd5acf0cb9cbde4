//! Error types
//!
//! `ProviderError` is the closed set of failures an upstream model provider
//! can surface mid-stream. `CoreError` covers failures of the core itself.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix applied to every user-facing error string
pub const ERROR_PREFIX: &str = "Error: ";

/// Provider-facing error kinds consumed by the stream processor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("request timed out")]
    Timeout,

    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("streaming error: {0}")]
    Streaming(String),

    #[error("token limit exceeded")]
    TokenLimitExceeded,
}

impl ProviderError {
    /// Human-readable text shown in place of (or after) the failed response
    pub fn user_message(&self) -> String {
        let body = match self {
            ProviderError::ConfigurationMissing(what) => {
                format!("Configuration is missing: {}. Check your settings.", what)
            }
            ProviderError::ConfigurationInvalid(what) => {
                format!("Configuration is invalid: {}. Check your settings.", what)
            }
            ProviderError::NetworkUnavailable => {
                "Network unavailable. Check your internet connection.".to_string()
            }
            ProviderError::Timeout => "The request timed out. Please try again.".to_string(),
            ProviderError::Provider { provider, message } => {
                format!("{} returned an error: {}", provider, message)
            }
            ProviderError::RateLimited {
                provider,
                retry_after: Some(wait),
            } => format!(
                "Rate limited by {}. Try again in {} seconds.",
                provider,
                wait.as_secs().max(1)
            ),
            ProviderError::RateLimited {
                provider,
                retry_after: None,
            } => format!("Rate limited by {}. Try again later.", provider),
            ProviderError::InvalidModel(model) => {
                format!("Model '{}' is not available. Select another model.", model)
            }
            ProviderError::InvalidResponse(reason) => {
                format!("Received an invalid response: {}", reason)
            }
            ProviderError::Streaming(message) => format!("Streaming failed: {}", message),
            ProviderError::TokenLimitExceeded => {
                "Token limit exceeded. Shorten the conversation and try again.".to_string()
            }
        };
        format!("{}{}", ERROR_PREFIX, body)
    }

    /// Whether retrying the same request could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::NetworkUnavailable
                | ProviderError::Timeout
                | ProviderError::RateLimited { .. }
        )
    }
}

/// Failures of the coordination core itself
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("event history is only recorded in debug mode")]
    HistoryDisabled,
}

pub type Result<T> = std::result::Result<T, CoreError>;
