//! Error types for provider operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching quotes from a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("provider returned HTTP {0}")]
    HttpStatus(u16),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("local call quota exhausted")]
    QuotaExhausted,

    #[error("failed to parse response: {0}")]
    ParseError(String),

    #[error("symbol not present in response: {0}")]
    MissingSymbol(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::ParseError(err.to_string())
        } else {
            ProviderError::RequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ParseError(err.to_string())
    }
}

impl ProviderError {
    /// Returns true if this error is transient and likely to succeed on retry.
    /// Use this to decide whether to fail over or wait for the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RequestFailed(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited
                | ProviderError::QuotaExhausted
                | ProviderError::HttpStatus(500..=599)
        )
    }

    /// Returns true if this error is permanent and requires manual intervention
    /// (bad API key, contract change) rather than automatic retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::ParseError(_) | ProviderError::HttpStatus(400..=499)
        ) && !matches!(self, ProviderError::HttpStatus(429))
    }

    /// Returns true if the failure should count against the provider's
    /// circuit breaker. Per-symbol gaps in an otherwise good response do not.
    pub fn is_call_failure(&self) -> bool {
        !matches!(self, ProviderError::MissingSymbol(_))
    }

    /// Returns a suggested retry delay for this error type, if applicable.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited | ProviderError::QuotaExhausted => {
                Some(Duration::from_secs(60))
            }
            ProviderError::RequestFailed(_) => Some(Duration::from_secs(5)),
            ProviderError::Timeout(_) => Some(Duration::from_secs(2)),
            ProviderError::HttpStatus(500..=599) => Some(Duration::from_secs(5)),
            ProviderError::HttpStatus(_)
            | ProviderError::ParseError(_)
            | ProviderError::MissingSymbol(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::Timeout("deadline".into()).is_transient());
        assert!(ProviderError::HttpStatus(503).is_transient());
        assert!(!ProviderError::ParseError("bad json".into()).is_transient());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(ProviderError::HttpStatus(401).is_permanent());
        assert!(ProviderError::ParseError("bad json".into()).is_permanent());
        assert!(!ProviderError::HttpStatus(429).is_permanent());
        assert!(!ProviderError::RequestFailed("reset".into()).is_permanent());
    }

    #[test]
    fn test_missing_symbol_not_a_call_failure() {
        assert!(!ProviderError::MissingSymbol("BTC".into()).is_call_failure());
        assert!(ProviderError::Timeout("deadline".into()).is_call_failure());
    }

    #[test]
    fn test_retry_delay() {
        assert_eq!(
            ProviderError::RateLimited.suggested_retry_delay(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(ProviderError::HttpStatus(404).suggested_retry_delay(), None);
    }
}
