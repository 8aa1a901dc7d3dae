//! Broadcast dispatcher: cache writes fanned out to subscribers.
//!
//! Consumes fetch events, applies them to the cache, and enqueues accepted
//! quotes onto every subscriber's outbound queue. The fan-out loop never
//! awaits, so one slow consumer cannot hold back the others.

use crate::cache::PriceCache;
use crate::queue::{OutboundQueue, PushOutcome};
use crate::registry::{ConnectionId, SubscriptionRegistry};
use crate::stats::EngineStats;
use dashmap::DashMap;
use pricestream_core::{now_ms, Quote};
use pricestream_feeds::FetchEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Fan-out hub between the fetcher and the connection sessions.
pub struct Dispatcher {
    cache: Arc<PriceCache>,
    registry: Arc<SubscriptionRegistry>,
    sinks: DashMap<ConnectionId, Arc<OutboundQueue>>,
    stats: Arc<EngineStats>,
}

impl Dispatcher {
    /// Create a dispatcher over the shared cache and registry.
    pub fn new(
        cache: Arc<PriceCache>,
        registry: Arc<SubscriptionRegistry>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            cache,
            registry,
            sinks: DashMap::new(),
            stats,
        }
    }

    /// Attach a connection's outbound queue. Called when a session
    /// becomes active.
    pub fn register(&self, connection: ConnectionId, queue: Arc<OutboundQueue>) {
        self.sinks.insert(connection, queue);
    }

    /// Detach a connection's outbound queue. Called on session close.
    pub fn unregister(&self, connection: ConnectionId) {
        self.sinks.remove(&connection);
    }

    /// Number of attached connections.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Consume fetch events until the channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<FetchEvent>) {
        info!("Starting dispatcher");

        while let Some(event) = events.recv().await {
            match event {
                FetchEvent::Quotes(quotes) => self.dispatch(quotes),
                FetchEvent::ProviderDown(provider, cooldown) => {
                    warn!(%provider, cooldown_secs = cooldown.as_secs(), "Provider down, serving from fallback");
                }
                FetchEvent::ProviderUp(provider) => {
                    info!(%provider, "Provider back up");
                }
            }
        }

        info!("Dispatcher stopped");
    }

    /// Apply a batch of quotes to the cache and fan accepted ones out.
    ///
    /// Synchronous on purpose: every push is non-blocking, so the cost of
    /// a dispatch cycle is independent of consumer speed.
    pub fn dispatch(&self, quotes: Vec<Quote>) {
        let now = now_ms();

        for quote in quotes {
            // The cache's ordering guard decides whether the update is real;
            // rejected writes must not reach subscribers either.
            if !self.cache.put(quote.clone(), now) {
                continue;
            }
            self.stats.record_dispatch();

            for connection in self.registry.subscribers_of(&quote.symbol) {
                let Some(sink) = self.sinks.get(&connection) else {
                    continue;
                };
                match sink.push(quote.clone()) {
                    PushOutcome::Queued => self.stats.record_enqueued(),
                    PushOutcome::Coalesced => {
                        self.stats.record_enqueued();
                        self.stats.record_coalesced();
                    }
                    PushOutcome::DroppedFull => {
                        self.stats.record_dropped();
                        warn!(connection, symbol = %quote.symbol, "Outbound queue full, frame dropped (degraded)");
                    }
                    PushOutcome::Poisoned => {
                        self.stats.record_dropped();
                        debug!(connection, "Queue poisoned, session will disconnect");
                    }
                    PushOutcome::DroppedStale | PushOutcome::Closed => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::queue::QueueConfig;
    use crate::registry::RegistryConfig;
    use pretty_assertions::assert_eq;
    use pricestream_core::{FixedPoint, Provider, QuoteCurrency, SignedFixedPoint, Symbol};

    fn quote(symbol: &str, price: f64, observed_at_ms: u64) -> Quote {
        Quote {
            symbol: Symbol::new(symbol),
            quote_currency: QuoteCurrency::USD,
            price: FixedPoint::from_f64(price),
            change_24h_abs: SignedFixedPoint(0),
            change_24h_bps: 0,
            volume_24h: FixedPoint(0),
            observed_at_ms,
            source: Provider::CoinGecko,
        }
    }

    fn harness() -> (Arc<Dispatcher>, Arc<SubscriptionRegistry>, Arc<PriceCache>) {
        let stats = Arc::new(EngineStats::new());
        let cache = Arc::new(PriceCache::new(CacheConfig::default(), Arc::clone(&stats)));
        let registry = Arc::new(SubscriptionRegistry::new(RegistryConfig::default()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
            stats,
        ));
        (dispatcher, registry, cache)
    }

    #[test]
    fn test_delivers_to_subscribers_only() {
        let (dispatcher, registry, _) = harness();

        let btc_queue = Arc::new(OutboundQueue::new(QueueConfig::default()));
        let eth_queue = Arc::new(OutboundQueue::new(QueueConfig::default()));
        registry.subscribe(1, &[Symbol::new("BTC")]).unwrap();
        registry.subscribe(2, &[Symbol::new("ETH")]).unwrap();
        dispatcher.register(1, Arc::clone(&btc_queue));
        dispatcher.register(2, Arc::clone(&eth_queue));

        dispatcher.dispatch(vec![quote("BTC", 47000.0, 1)]);

        assert_eq!(btc_queue.len(), 1);
        assert_eq!(eth_queue.len(), 0);
    }

    #[test]
    fn test_rejected_cache_write_not_fanned_out() {
        let (dispatcher, registry, cache) = harness();

        let queue = Arc::new(OutboundQueue::new(QueueConfig::default()));
        registry.subscribe(1, &[Symbol::new("BTC")]).unwrap();
        dispatcher.register(1, Arc::clone(&queue));

        dispatcher.dispatch(vec![quote("BTC", 47100.0, 100)]);
        dispatcher.dispatch(vec![quote("BTC", 47000.0, 50)]); // out of order

        assert_eq!(queue.len(), 1);
        let (value, _) = cache.get(&Symbol::new("BTC"), QuoteCurrency::USD, 200);
        assert!((value.unwrap().price.to_f64() - 47100.0).abs() < 1e-6);
    }

    #[test]
    fn test_slow_consumer_isolated_from_others() {
        let (dispatcher, registry, _) = harness();

        // Slow consumer with a tiny queue; healthy consumer beside it
        let slow = Arc::new(OutboundQueue::new(QueueConfig {
            capacity: 1,
            max_consecutive_drops: 2,
        }));
        let healthy = Arc::new(OutboundQueue::new(QueueConfig::default()));
        registry.subscribe(1, &[Symbol::new("BTC"), Symbol::new("ETH"), Symbol::new("SOL")]).unwrap();
        registry.subscribe(2, &[Symbol::new("BTC"), Symbol::new("ETH"), Symbol::new("SOL")]).unwrap();
        dispatcher.register(1, Arc::clone(&slow));
        dispatcher.register(2, Arc::clone(&healthy));

        // Distinct symbols defeat coalescing; the slow queue overflows
        dispatcher.dispatch(vec![quote("BTC", 1.0, 1)]);
        dispatcher.dispatch(vec![quote("ETH", 2.0, 2)]);
        dispatcher.dispatch(vec![quote("SOL", 3.0, 3)]);
        dispatcher.dispatch(vec![quote("BTC", 4.0, 4)]);

        assert!(slow.is_poisoned());
        // The healthy consumer kept receiving throughout; its second BTC
        // update coalesced into the first
        assert_eq!(healthy.len(), 3);
    }

    #[test]
    fn test_unregistered_connection_skipped() {
        let (dispatcher, registry, _) = harness();
        registry.subscribe(1, &[Symbol::new("BTC")]).unwrap();

        // No sink registered: dispatch must not panic
        dispatcher.dispatch(vec![quote("BTC", 47000.0, 1)]);
        assert_eq!(dispatcher.sink_count(), 0);
    }

    #[tokio::test]
    async fn test_run_consumes_events_until_close() {
        let (dispatcher, registry, cache) = harness();
        registry.subscribe(1, &[Symbol::new("BTC")]).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(Arc::clone(&dispatcher).run(rx));

        tx.send(FetchEvent::Quotes(vec![quote("BTC", 47000.0, 1)]))
            .await
            .unwrap();
        tx.send(FetchEvent::ProviderDown(
            Provider::CoinGecko,
            std::time::Duration::from_secs(60),
        ))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let (value, _) = cache.get(&Symbol::new("BTC"), QuoteCurrency::USD, 100);
        assert!(value.is_some());
    }

    #[test]
    fn test_slow_consumer_poisoning_after_coalesce_exhausted() {
        // A connection that never reads is disconnected within a bounded
        // number of dispatch cycles: capacity + max_consecutive_drops
        // cycles of distinct symbols at most.
        let (dispatcher, registry, _) = harness();
        let queue = Arc::new(OutboundQueue::new(QueueConfig {
            capacity: 2,
            max_consecutive_drops: 3,
        }));
        let symbols: Vec<Symbol> = ["A", "B", "C", "D", "E"].iter().map(|s| Symbol::new(s)).collect();
        registry.subscribe(1, &symbols).unwrap();
        dispatcher.register(1, Arc::clone(&queue));

        for (i, symbol) in symbols.iter().enumerate() {
            dispatcher.dispatch(vec![quote(symbol.as_str(), 1.0, i as u64 + 1)]);
        }

        assert!(queue.is_poisoned());
    }
}
