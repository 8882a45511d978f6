//! Error types for OpenAI client.

use thiserror::Error;

/// Result type for OpenAI client operations.
pub type Result<T> = std::result::Result<T, OpenAIError>;

#[derive(Debug, Error)]
pub enum OpenAIError {
    /// Missing API key or an HTTP client that could not be built
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// Non-2xx response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 2xx response without a single choice
    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Parse error: {0}")]
    Parse(String),
}

impl OpenAIError {
    /// Network failures, timeouts, rate limits and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::EmptyResponse => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Config(_) | Self::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for OpenAIError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OpenAIError::Timeout.is_transient());
        assert!(OpenAIError::Network("reset".into()).is_transient());
        assert!(OpenAIError::Api { status: 429, message: "slow down".into() }.is_transient());
        assert!(OpenAIError::Api { status: 503, message: "overloaded".into() }.is_transient());
        assert!(!OpenAIError::Api { status: 401, message: "bad key".into() }.is_transient());
        assert!(!OpenAIError::Config("missing key".into()).is_transient());
        assert!(!OpenAIError::Parse("bad json".into()).is_transient());
    }
}
