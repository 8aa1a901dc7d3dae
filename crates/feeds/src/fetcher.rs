//! The poll loop: batch, quota-gate, fail over, emit.

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::message::FetchEvent;
use crate::provider::QuoteProvider;
use crate::quota::ProviderQuota;
use pricestream_core::{Provider, Symbol};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default buffer size for the fetch event channel.
pub const FETCH_EVENT_BUFFER: usize = 256;

/// Source of the symbols to poll.
///
/// Read fresh at every tick so unsubscribed symbols drop out of the poll
/// batch immediately.
pub trait SymbolSource: Send + Sync {
    /// Symbols that currently have at least one subscriber.
    fn watched_symbols(&self) -> Vec<Symbol>;
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Interval between poll ticks
    pub poll_interval: Duration,
    /// Circuit breaker settings, applied per provider
    pub breaker: BreakerConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Periodic upstream poller.
///
/// Providers are tried in configuration order: the first is primary, the
/// rest are fallbacks. A symbol set that cannot be served by one provider
/// (quota spent, call failed, breaker open, symbol absent from the
/// response) rolls over to the next. Symbols left after the last provider
/// are skipped for the tick; their cache entries age into staleness.
pub struct Fetcher {
    providers: Vec<Box<dyn QuoteProvider>>,
    quotas: HashMap<Provider, ProviderQuota>,
    breakers: HashMap<Provider, CircuitBreaker>,
    symbols: Arc<dyn SymbolSource>,
    events: mpsc::Sender<FetchEvent>,
    config: FetcherConfig,
}

impl Fetcher {
    /// Create a fetcher over an ordered provider chain.
    ///
    /// Quotas default to each provider's published budget
    /// ([`ProviderQuota::for_provider`]); override with [`Fetcher::with_quota`].
    pub fn new(
        providers: Vec<Box<dyn QuoteProvider>>,
        symbols: Arc<dyn SymbolSource>,
        events: mpsc::Sender<FetchEvent>,
        config: FetcherConfig,
    ) -> Self {
        let quotas = providers
            .iter()
            .map(|p| (p.provider(), ProviderQuota::for_provider(p.provider())))
            .collect();
        let breakers = providers
            .iter()
            .map(|p| (p.provider(), CircuitBreaker::new(config.breaker)))
            .collect();

        Self {
            providers,
            quotas,
            breakers,
            symbols,
            events,
            config,
        }
    }

    /// Replace the quota tracker for one provider.
    pub fn with_quota(mut self, provider: Provider, quota: ProviderQuota) -> Self {
        self.quotas.insert(provider, quota);
        self
    }

    /// Run the poll loop until the event channel closes.
    pub async fn run(mut self) {
        info!(
            providers = self.providers.len(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting fetcher poll loop"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.events.is_closed() {
                break;
            }

            let symbols = self.symbols.watched_symbols();
            if symbols.is_empty() {
                debug!("No watched symbols, skipping tick");
                continue;
            }

            self.poll_once(&symbols).await;
        }

        info!("Fetcher poll loop stopped");
    }

    /// Execute one poll tick over the given symbol set.
    ///
    /// Exposed separately so tests can drive ticks without the timer.
    pub async fn poll_once(&mut self, symbols: &[Symbol]) {
        let mut remaining: Vec<Symbol> = symbols.to_vec();

        for idx in 0..self.providers.len() {
            if remaining.is_empty() {
                break;
            }

            let provider = self.providers[idx].provider();

            let breaker = self.breakers.get_mut(&provider).expect("breaker registered");
            if !breaker.allow_call() {
                debug!(%provider, "Breaker open, routing to fallback");
                continue;
            }

            remaining = self.poll_provider(idx, remaining).await;
        }

        if !remaining.is_empty() {
            debug!(
                skipped = remaining.len(),
                "Tick exhausted provider chain; entries will age into stale"
            );
        }
    }

    /// Poll a single provider for the given symbols.
    ///
    /// Returns the symbols that still need a quote (failed calls, spent
    /// quota, or absent from the response).
    async fn poll_provider(&mut self, idx: usize, symbols: Vec<Symbol>) -> Vec<Symbol> {
        let provider = self.providers[idx].provider();
        let max_per_call = self.providers[idx].max_symbols_per_call().max(1);

        let mut unserved: Vec<Symbol> = Vec::new();
        let mut any_attempt = false;
        let mut any_success = false;

        for chunk in symbols.chunks(max_per_call) {
            if !self.acquire_call_budget(provider).await {
                debug!(%provider, symbols = chunk.len(), "Call quota exhausted, deferring chunk");
                unserved.extend_from_slice(chunk);
                continue;
            }

            any_attempt = true;
            match self.providers[idx].fetch_quotes(chunk).await {
                Ok(quotes) => {
                    any_success = true;

                    // Symbols the provider silently omitted roll over to the fallback.
                    let covered: HashSet<&Symbol> = quotes.iter().map(|q| &q.symbol).collect();
                    for symbol in chunk {
                        if !covered.contains(symbol) {
                            unserved.push(symbol.clone());
                        }
                    }

                    if !quotes.is_empty() {
                        debug!(%provider, count = quotes.len(), "Fetched quotes");
                        if self.events.send(FetchEvent::Quotes(quotes)).await.is_err() {
                            return unserved;
                        }
                    }
                }
                Err(e) => {
                    warn!(%provider, error = %e, symbols = chunk.len(), "Provider call failed");
                    unserved.extend_from_slice(chunk);
                    if !e.is_call_failure() {
                        any_success = true;
                    }
                }
            }
        }

        // Breaker accounting is per tick: a tick with at least one good call
        // keeps the provider closed; a tick where every call failed counts
        // one failure toward the threshold. Quota-deferred chunks are not
        // provider failures.
        if any_attempt {
            let breaker = self.breakers.get_mut(&provider).expect("breaker registered");
            if any_success {
                if breaker.record_success() {
                    info!(%provider, "Provider recovered, breaker closed");
                    let _ = self.events.send(FetchEvent::ProviderUp(provider)).await;
                }
            } else if breaker.record_failure() {
                let cooldown = breaker.config().cooldown;
                warn!(%provider, cooldown_secs = cooldown.as_secs(), "Breaker tripped open");
                let _ = self
                    .events
                    .send(FetchEvent::ProviderDown(provider, cooldown))
                    .await;
            }
        }

        unserved
    }

    /// Consume one call from the provider's budget.
    ///
    /// The inter-call spacing between chunks of the same tick is honored by
    /// a bounded sleep. A spent window is not waited out; the chunk defers
    /// to the fallback instead.
    async fn acquire_call_budget(&mut self, provider: Provider) -> bool {
        let quota = self.quotas.get_mut(&provider).expect("quota registered");
        if quota.try_acquire() {
            return true;
        }

        let wait = quota.time_until_available();
        if wait > quota.config().min_delay() {
            return false;
        }
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        self.quotas
            .get_mut(&provider)
            .expect("quota registered")
            .try_acquire()
    }

    /// Breaker state for a provider (monitoring and tests).
    pub fn breaker_state(&self, provider: Provider) -> Option<crate::breaker::BreakerState> {
        self.breakers.get(&provider).map(|b| b.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::error::ProviderError;
    use crate::quota::QuotaConfig;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use pricestream_core::{FixedPoint, Quote, QuoteCurrency, SignedFixedPoint};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FixedSymbols(Vec<Symbol>);

    impl SymbolSource for FixedSymbols {
        fn watched_symbols(&self) -> Vec<Symbol> {
            self.0.clone()
        }
    }

    /// Provider double: serves every requested symbol unless failing.
    struct ScriptedProvider {
        provider: Provider,
        max_per_call: usize,
        failing: AtomicBool,
        calls: AtomicU64,
    }

    impl ScriptedProvider {
        fn new(provider: Provider) -> Self {
            Self {
                provider,
                max_per_call: 50,
                failing: AtomicBool::new(false),
                calls: AtomicU64::new(0),
            }
        }

        fn quote(provider: Provider, symbol: &Symbol) -> Quote {
            Quote {
                symbol: symbol.clone(),
                quote_currency: QuoteCurrency::USD,
                price: FixedPoint::from_f64(100.0),
                change_24h_abs: SignedFixedPoint(0),
                change_24h_bps: 0,
                volume_24h: FixedPoint(0),
                observed_at_ms: pricestream_core::now_ms(),
                source: provider,
            }
        }
    }

    #[async_trait]
    impl QuoteProvider for &'static ScriptedProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn max_symbols_per_call(&self) -> usize {
            self.max_per_call
        }

        async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, ProviderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.failing.load(Ordering::Relaxed) {
                return Err(ProviderError::Timeout("deadline elapsed".to_string()));
            }
            Ok(symbols
                .iter()
                .map(|s| ScriptedProvider::quote(self.provider, s))
                .collect())
        }
    }

    fn leak(p: ScriptedProvider) -> &'static ScriptedProvider {
        Box::leak(Box::new(p))
    }

    fn fetcher_with(
        providers: Vec<Box<dyn QuoteProvider>>,
    ) -> (Fetcher, mpsc::Receiver<FetchEvent>) {
        let (tx, rx) = mpsc::channel(FETCH_EVENT_BUFFER);
        let symbols = Arc::new(FixedSymbols(vec![Symbol::new("BTC"), Symbol::new("ETH")]));
        // Wide-open budgets so tests can drive back-to-back ticks
        let fetcher = Fetcher::new(providers, symbols, tx, FetcherConfig::default())
            .with_quota(
                Provider::CoinGecko,
                ProviderQuota::new(QuotaConfig::new(10_000, 60_000, 0)),
            )
            .with_quota(
                Provider::CoinCap,
                ProviderQuota::new(QuotaConfig::new(10_000, 60_000, 0)),
            );
        (fetcher, rx)
    }

    fn drain_quotes(rx: &mut mpsc::Receiver<FetchEvent>) -> Vec<Quote> {
        let mut quotes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let FetchEvent::Quotes(batch) = event {
                quotes.extend(batch);
            }
        }
        quotes
    }

    #[tokio::test]
    async fn test_primary_serves_all_symbols() {
        let primary = leak(ScriptedProvider::new(Provider::CoinGecko));
        let fallback = leak(ScriptedProvider::new(Provider::CoinCap));
        let (mut fetcher, mut rx) = fetcher_with(vec![Box::new(primary), Box::new(fallback)]);

        fetcher
            .poll_once(&[Symbol::new("BTC"), Symbol::new("ETH")])
            .await;

        let quotes = drain_quotes(&mut rx);
        assert_eq!(quotes.len(), 2);
        assert!(quotes.iter().all(|q| q.source == Provider::CoinGecko));
        assert_eq!(fallback.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_failover_to_fallback_on_primary_error() {
        let primary = leak(ScriptedProvider::new(Provider::CoinGecko));
        primary.failing.store(true, Ordering::Relaxed);
        let fallback = leak(ScriptedProvider::new(Provider::CoinCap));
        let (mut fetcher, mut rx) = fetcher_with(vec![Box::new(primary), Box::new(fallback)]);

        fetcher.poll_once(&[Symbol::new("BTC")]).await;

        let quotes = drain_quotes(&mut rx);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].source, Provider::CoinCap);
    }

    #[tokio::test]
    async fn test_breaker_trips_after_three_failed_ticks() {
        let primary = leak(ScriptedProvider::new(Provider::CoinGecko));
        primary.failing.store(true, Ordering::Relaxed);
        let fallback = leak(ScriptedProvider::new(Provider::CoinCap));
        let (mut fetcher, mut rx) = fetcher_with(vec![Box::new(primary), Box::new(fallback)]);

        for _ in 0..3 {
            fetcher.poll_once(&[Symbol::new("BTC")]).await;
        }
        assert_eq!(
            fetcher.breaker_state(Provider::CoinGecko),
            Some(BreakerState::Open)
        );

        let tripped = {
            let mut seen = false;
            while let Ok(event) = rx.try_recv() {
                if matches!(event, FetchEvent::ProviderDown(Provider::CoinGecko, _)) {
                    seen = true;
                }
            }
            seen
        };
        assert!(tripped);

        // While open, the primary is skipped entirely; fallback still serves.
        let calls_before = primary.calls.load(Ordering::Relaxed);
        fetcher.poll_once(&[Symbol::new("BTC")]).await;
        assert_eq!(primary.calls.load(Ordering::Relaxed), calls_before);
        assert!(fallback.calls.load(Ordering::Relaxed) >= 4);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_defers_to_fallback() {
        let primary = leak(ScriptedProvider::new(Provider::CoinGecko));
        let fallback = leak(ScriptedProvider::new(Provider::CoinCap));
        let (fetcher, mut rx) = fetcher_with(vec![Box::new(primary), Box::new(fallback)]);
        // Primary budget of a single call per window
        let mut fetcher = fetcher.with_quota(
            Provider::CoinGecko,
            ProviderQuota::new(QuotaConfig::new(1, 60_000, 0)),
        );

        fetcher.poll_once(&[Symbol::new("BTC")]).await;
        fetcher.poll_once(&[Symbol::new("BTC")]).await;

        let quotes = drain_quotes(&mut rx);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].source, Provider::CoinGecko);
        assert_eq!(quotes[1].source, Provider::CoinCap);
        // Quota exhaustion is not a provider failure
        assert_eq!(
            fetcher.breaker_state(Provider::CoinGecko),
            Some(BreakerState::Closed)
        );
    }

    #[tokio::test]
    async fn test_all_providers_down_skips_tick() {
        let primary = leak(ScriptedProvider::new(Provider::CoinGecko));
        primary.failing.store(true, Ordering::Relaxed);
        let fallback = leak(ScriptedProvider::new(Provider::CoinCap));
        fallback.failing.store(true, Ordering::Relaxed);
        let (mut fetcher, mut rx) = fetcher_with(vec![Box::new(primary), Box::new(fallback)]);

        fetcher.poll_once(&[Symbol::new("BTC")]).await;

        assert!(drain_quotes(&mut rx).is_empty());
    }
}
