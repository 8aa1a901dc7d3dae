//! Error types for engine operations.

use pricestream_core::QuoteCurrency;
use thiserror::Error;

/// Errors that can occur in the distribution engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// No conversion rate configured for the requested currency pair.
    /// Surfaced to the caller; never silently defaulted to 1:1.
    #[error("no conversion rate configured for {from} -> {to}")]
    ConversionUnavailable {
        from: QuoteCurrency,
        to: QuoteCurrency,
    },

    /// The connection asked for more symbols than the per-connection cap.
    /// Existing subscriptions are left untouched.
    #[error("subscription limit exceeded (cap: {limit})")]
    SubscriptionLimitExceeded { limit: usize },

    /// The connection's outbound queue overflowed past the drop threshold;
    /// the session must disconnect to protect the rest of the fleet.
    #[error("consumer too slow, outbound queue overflowed repeatedly")]
    SlowConsumer,

    /// The outbound queue was closed underneath a waiting receiver.
    #[error("outbound queue closed")]
    QueueClosed,
}

impl EngineError {
    /// Wire error code delivered to the client for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::ConversionUnavailable { .. } => "conversion_unavailable",
            EngineError::SubscriptionLimitExceeded { .. } => "subscription_limit",
            EngineError::SlowConsumer => "slow_consumer",
            EngineError::QueueClosed => "queue_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EngineError::ConversionUnavailable {
            from: QuoteCurrency::USD,
            to: QuoteCurrency::INR,
        };
        assert_eq!(err.code(), "conversion_unavailable");
        assert_eq!(
            EngineError::SubscriptionLimitExceeded { limit: 100 }.code(),
            "subscription_limit"
        );
    }

    #[test]
    fn test_display_names_pair() {
        let err = EngineError::ConversionUnavailable {
            from: QuoteCurrency::USD,
            to: QuoteCurrency::INR,
        };
        assert_eq!(err.to_string(), "no conversion rate configured for USD -> INR");
    }
}
