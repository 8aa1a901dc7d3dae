//! Short-TTL price cache with explicit staleness signaling.
//!
//! Single source of truth for "latest known price". Reads never fail: a
//! missing key reports `NotFound` and an aged entry reports `Stale` with
//! its last value, so the UI can show old data with a timestamp instead
//! of blocking.

use crate::stats::EngineStats;
use dashmap::DashMap;
use pricestream_core::{Quote, QuoteCurrency, QuoteKey, Symbol};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry counts as fresh after its fetch
    pub freshness_window: Duration,
    /// How long an unwatched entry may linger before eviction
    pub eviction_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(60),
            eviction_grace: Duration::from_secs(300),
        }
    }
}

/// Staleness classification of a cache read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Fetched within the freshness window.
    Fresh,
    /// Last fetch is older than the freshness window; value still served.
    Stale,
    /// No observation exists for the key yet.
    NotFound,
}

impl Staleness {
    /// Wire representation: anything but a fresh value flags `stale`.
    pub fn is_stale(self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

/// A cached observation plus its local fetch time.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The observation itself
    pub quote: Quote,
    /// When this process stored it (unix ms); staleness is measured
    /// against this, not the provider-side `observed_at`
    pub fetched_at_ms: u64,
}

/// Thread-safe price cache keyed by (symbol, quote currency).
#[derive(Debug)]
pub struct PriceCache {
    entries: DashMap<QuoteKey, CacheEntry>,
    config: CacheConfig,
    stats: Arc<EngineStats>,
}

impl PriceCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig, stats: Arc<EngineStats>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats,
        }
    }

    /// Get the latest known quote and its staleness. Never fails.
    pub fn get(
        &self,
        symbol: &Symbol,
        currency: QuoteCurrency,
        now_ms: u64,
    ) -> (Option<Quote>, Staleness) {
        let key = (symbol.clone(), currency);
        match self.entries.get(&key) {
            Some(entry) => {
                let age = now_ms.saturating_sub(entry.fetched_at_ms);
                let staleness = if age < self.config.freshness_window.as_millis() as u64 {
                    Staleness::Fresh
                } else {
                    Staleness::Stale
                };
                (Some(entry.quote.clone()), staleness)
            }
            None => (None, Staleness::NotFound),
        }
    }

    /// Store an observation, overwriting the previous one for its key.
    ///
    /// A quote whose `observed_at` is older than the stored one is rejected
    /// so a delayed fetch can never regress a price. Returns `true` when
    /// the write was applied.
    pub fn put(&self, quote: Quote, now_ms: u64) -> bool {
        let key = quote.key();

        if let Some(existing) = self.entries.get(&key) {
            if quote.observed_at_ms < existing.quote.observed_at_ms {
                warn!(
                    symbol = %quote.symbol,
                    incoming = quote.observed_at_ms,
                    stored = existing.quote.observed_at_ms,
                    "Rejecting out-of-order cache write"
                );
                self.stats.record_rejected_write();
                return false;
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                quote,
                fetched_at_ms: now_ms,
            },
        );
        self.stats.record_ingested();
        true
    }

    /// Remove entries nobody watches anymore.
    ///
    /// An entry is evicted when its symbol has zero subscribers and its
    /// last fetch is older than the eviction grace period. Keeps memory
    /// bounded under high symbol churn.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_unwatched(&self, watched: &HashSet<Symbol>, now_ms: u64) -> usize {
        let grace_ms = self.config.eviction_grace.as_millis() as u64;
        let before = self.entries.len();

        self.entries.retain(|(symbol, _), entry| {
            watched.contains(symbol) || now_ms.saturating_sub(entry.fetched_at_ms) <= grace_ms
        });

        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "Evicted unwatched cache entries");
        }
        evicted
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freshness window (for staleness math in callers' logs).
    pub fn freshness_window(&self) -> Duration {
        self.config.freshness_window
    }
}
