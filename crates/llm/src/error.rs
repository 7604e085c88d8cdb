//! Error types for text-generation providers.

use thiserror::Error;

/// Errors returned by an [`AIProvider`](crate::AIProvider).
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider is missing credentials or configuration
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// The API answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the service
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Client errors other than 408/429 are permanent: the same request will
    /// be rejected again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::RateLimited { .. } | LlmError::Other(_) => true,
            LlmError::Api { status, .. } => *status == 408 || *status >= 500,
            LlmError::NotConfigured(_) | LlmError::Serialization(_) => false,
        }
    }
}

/// Result alias for provider calls.
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::RateLimited {
            retry_after_secs: 3
        }
        .is_retryable());
        assert!(LlmError::Api {
            status: 529,
            message: "overloaded".to_string()
        }
        .is_retryable());
        assert!(!LlmError::Api {
            status: 400,
            message: "bad request".to_string()
        }
        .is_retryable());
        assert!(!LlmError::NotConfigured("ANTHROPIC_API_KEY not set".to_string()).is_retryable());
    }
}
