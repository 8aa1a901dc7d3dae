//! Per-provider circuit breaker.
//!
//! Repeated failed poll ticks against a provider trip the breaker open and
//! route traffic to the fallback until a cooldown elapses; a single half-open
//! probe then decides whether the provider is healthy again.

use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failed ticks before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Provider healthy; calls flow normally.
    Closed,
    /// Provider tripped; calls are skipped until the cooldown elapses.
    Open,
    /// Cooldown elapsed; exactly one probe call is admitted.
    HalfOpen,
}

/// Circuit breaker for a single provider.
///
/// State machine: `Closed → Open` after `failure_threshold` consecutive
/// failures; `Open → HalfOpen` once the cooldown elapses; `HalfOpen →
/// Closed` on probe success, `HalfOpen → Open` on probe failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Whether a call to this provider is admitted right now.
    ///
    /// An open breaker whose cooldown has elapsed transitions to half-open
    /// and admits the probe.
    pub fn allow_call(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful tick. Closes the breaker and clears the
    /// failure streak.
    ///
    /// Returns `true` if this success re-closed a previously tripped breaker.
    pub fn record_success(&mut self) -> bool {
        let reopened = self.state != BreakerState::Closed;
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        reopened
    }

    /// Record a failed tick.
    ///
    /// Returns `true` if this failure tripped the breaker open (either the
    /// streak reached the threshold or a half-open probe failed).
    pub fn record_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.trip();
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                self.trip();
                true
            }
            BreakerState::Open => false,
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
    }

    /// Current state (cooldown expiry is only observed by `allow_call`).
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Remaining cooldown, if open.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (BreakerState::Open, Some(at)) => {
                Some(self.config.cooldown.saturating_sub(at.elapsed()))
            }
            _ => None,
        }
    }

    /// Breaker configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }
}
