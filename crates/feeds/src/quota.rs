//! Per-provider call budgets.
//!
//! Providers cap the number of API calls per rolling window. The budget is
//! enforced locally with a token bucket so a burst of poll ticks can never
//! push a provider into banning the API key.

use pricestream_core::Provider;
use std::time::{Duration, Instant};

/// Call-rate configuration for a provider.
///
/// Defines the maximum number of calls allowed within a rolling time window,
/// plus a minimum spacing between consecutive calls.
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    /// Maximum calls per window
    pub max_calls: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Minimum delay between calls in milliseconds
    pub min_delay_ms: u64,
}

impl QuotaConfig {
    /// Create a new quota configuration.
    pub const fn new(max_calls: u32, window_ms: u64, min_delay_ms: u64) -> Self {
        Self {
            max_calls,
            window_ms,
            min_delay_ms,
        }
    }

    /// Get the default call budget for a provider.
    ///
    /// ## Provider limits:
    /// - **CoinGecko**: 30 calls/min on the free tier (conservative; the
    ///   pro tier allows 500/min but the free ceiling is the safe default)
    /// - **CoinCap**: 200 calls/min without a key; 100/min kept as margin
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::CoinGecko => Self::new(30, 60_000, 1_000),
            Provider::CoinCap => Self::new(100, 60_000, 200),
        }
    }

    /// Minimum time to wait between calls.
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Rolling window duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Token bucket enforcing a provider's call budget.
///
/// Tokens replenish continuously over the rolling window and one token is
/// consumed per HTTP call. `try_acquire` never blocks; the fetcher skips to
/// the fallback provider when the budget is spent.
#[derive(Debug)]
pub struct ProviderQuota {
    /// Budget configuration
    config: QuotaConfig,
    /// Tokens available (calls that can be made now)
    tokens: f64,
    /// Last time tokens were replenished
    last_update: Instant,
    /// Last time a call was made
    last_call: Option<Instant>,
}

impl ProviderQuota {
    /// Create a new quota tracker with the given configuration, starting full.
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            tokens: config.max_calls as f64,
            last_update: Instant::now(),
            last_call: None,
            config,
        }
    }

    /// Create a quota tracker with a provider's default budget.
    pub fn for_provider(provider: Provider) -> Self {
        Self::new(QuotaConfig::for_provider(provider))
    }

    /// Replenish tokens based on elapsed time.
    fn replenish(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_update).as_millis() as f64;
        let tokens_to_add = (elapsed_ms / self.config.window_ms as f64) * self.config.max_calls as f64;

        self.tokens = (self.tokens + tokens_to_add).min(self.config.max_calls as f64);
        self.last_update = now;
    }

    /// Try to consume one call from the budget.
    ///
    /// Returns `true` if the call may proceed, `false` if the budget is
    /// exhausted or the minimum inter-call delay has not elapsed.
    pub fn try_acquire(&mut self) -> bool {
        self.replenish();

        if let Some(last) = self.last_call {
            if last.elapsed() < self.config.min_delay() {
                return false;
            }
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.last_call = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Time until the next call would be admitted.
    ///
    /// Returns `Duration::ZERO` if a call is admissible now.
    pub fn time_until_available(&mut self) -> Duration {
        self.replenish();

        if let Some(last) = self.last_call {
            let since_last = last.elapsed();
            let min_delay = self.config.min_delay();
            if since_last < min_delay {
                return min_delay - since_last;
            }
        }

        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let time_per_token = self.config.window_ms as f64 / self.config.max_calls as f64;
            Duration::from_millis((tokens_needed * time_per_token) as u64)
        }
    }

    /// Current token count (for monitoring and tests).
    pub fn available_tokens(&mut self) -> f64 {
        self.replenish();
        self.tokens
    }

    /// Budget configuration.
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Reset the budget to full capacity.
    pub fn reset(&mut self) {
        self.tokens = self.config.max_calls as f64;
        self.last_update = Instant::now();
        self.last_call = None;
    }
}
