//! Bounded per-connection outbound queue with per-symbol coalescing.
//!
//! Clients only need the latest price per symbol, so when a consumer lags,
//! a queued update for a symbol is superseded in place by the newer one
//! instead of growing the queue. A consumer that cannot keep up even with
//! coalescing gets poisoned and force-disconnected, protecting the rest of
//! the fleet.

use crate::error::EngineError;
use pricestream_core::Quote;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum queued frames per connection
    pub capacity: usize,
    /// Consecutive full-queue drops before the connection is poisoned
    pub max_consecutive_drops: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_consecutive_drops: 3,
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended to the queue.
    Queued,
    /// Replaced an older queued update for the same key, in place.
    Coalesced,
    /// Discarded: older than the update already queued for the key.
    DroppedStale,
    /// Discarded: queue full and no same-key slot to coalesce into.
    /// The connection is degraded from the first such drop.
    DroppedFull,
    /// The drop streak crossed the threshold; the queue is now poisoned
    /// and the session must disconnect.
    Poisoned,
    /// The queue was closed by the session.
    Closed,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Quote>,
    consecutive_drops: u32,
    poisoned: bool,
    closed: bool,
}

/// Bounded outbound queue for one connection.
///
/// Single consumer (the session's drain loop), many producers (the
/// dispatcher). `push` never blocks; `recv` suspends until a frame,
/// poisoning, or close.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    config: QueueConfig,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            config,
        }
    }

    /// Enqueue a quote, coalescing against any queued update for the same
    /// (symbol, currency) key.
    pub fn push(&self, quote: Quote) -> PushOutcome {
        let mut inner = self.inner.lock().expect("queue lock poisoned");

        if inner.poisoned {
            return PushOutcome::Poisoned;
        }
        if inner.closed {
            return PushOutcome::Closed;
        }

        let key = quote.key();
        if let Some(pos) = inner.items.iter().position(|q| q.key() == key) {
            // Ordering guard: never let an older observation overwrite a
            // newer one within the queue.
            if quote.observed_at_ms < inner.items[pos].observed_at_ms {
                return PushOutcome::DroppedStale;
            }
            inner.items[pos] = quote;
            inner.consecutive_drops = 0;
            drop(inner);
            self.notify.notify_one();
            return PushOutcome::Coalesced;
        }

        if inner.items.len() < self.config.capacity {
            inner.items.push_back(quote);
            inner.consecutive_drops = 0;
            drop(inner);
            self.notify.notify_one();
            return PushOutcome::Queued;
        }

        inner.consecutive_drops += 1;
        if inner.consecutive_drops >= self.config.max_consecutive_drops {
            inner.poisoned = true;
            drop(inner);
            // Wake the consumer so it observes the poisoning promptly
            self.notify.notify_waiters();
            return PushOutcome::Poisoned;
        }
        PushOutcome::DroppedFull
    }

    /// Take the next frame without waiting. Used by the drain phase.
    pub fn pop(&self) -> Option<Quote> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.items.pop_front()
    }

    /// Wait for the next frame.
    ///
    /// Errors with `SlowConsumer` once the queue is poisoned and with
    /// `QueueClosed` after `close` once the backlog is empty.
    pub async fn recv(&self) -> Result<Quote, EngineError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.poisoned {
                    return Err(EngineError::SlowConsumer);
                }
                if let Some(quote) = inner.items.pop_front() {
                    return Ok(quote);
                }
                if inner.closed {
                    return Err(EngineError::QueueClosed);
                }
            }
            notified.await;
        }
    }

    /// Close the queue and wake any waiting receiver.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Whether the queue has been poisoned by overflow.
    pub fn is_poisoned(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").poisoned
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").items.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricestream_core::{FixedPoint, Provider, QuoteCurrency, SignedFixedPoint, Symbol};
    use std::sync::Arc;
    use std::time::Duration;

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

    fn small_queue(capacity: usize, max_drops: u32) -> OutboundQueue {
        OutboundQueue::new(QueueConfig {
            capacity,
            max_consecutive_drops: max_drops,
        })
    }

    #[test]
    fn test_fifo_across_symbols() {
        let q = small_queue(8, 3);
        assert_eq!(q.push(quote("BTC", 1.0, 1)), PushOutcome::Queued);
        assert_eq!(q.push(quote("ETH", 2.0, 2)), PushOutcome::Queued);

        assert_eq!(q.pop().unwrap().symbol, Symbol::new("BTC"));
        assert_eq!(q.pop().unwrap().symbol, Symbol::new("ETH"));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_coalesce_replaces_in_place() {
        let q = small_queue(8, 3);
        q.push(quote("BTC", 1.0, 1));
        q.push(quote("ETH", 2.0, 2));
        assert_eq!(q.push(quote("BTC", 3.0, 3)), PushOutcome::Coalesced);

        assert_eq!(q.len(), 2);
        // BTC kept its queue position but carries the newest price
        let first = q.pop().unwrap();
        assert_eq!(first.symbol, Symbol::new("BTC"));
        assert!((first.price.to_f64() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_update_dropped_on_coalesce() {
        let q = small_queue(8, 3);
        q.push(quote("BTC", 2.0, 10));
        assert_eq!(q.push(quote("BTC", 1.0, 5)), PushOutcome::DroppedStale);

        assert!((q.pop().unwrap().price.to_f64() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_queue_poisons_after_drop_streak() {
        let q = small_queue(2, 3);
        q.push(quote("BTC", 1.0, 1));
        q.push(quote("ETH", 2.0, 2));

        // Distinct symbols, no coalescing slot: queue is full
        assert_eq!(q.push(quote("SOL", 3.0, 3)), PushOutcome::DroppedFull);
        assert_eq!(q.push(quote("ADA", 4.0, 4)), PushOutcome::DroppedFull);
        assert_eq!(q.push(quote("DOT", 5.0, 5)), PushOutcome::Poisoned);
        assert!(q.is_poisoned());
        assert_eq!(q.push(quote("XRP", 6.0, 6)), PushOutcome::Poisoned);
    }

    #[test]
    fn test_successful_push_resets_drop_streak() {
        let q = small_queue(2, 3);
        q.push(quote("BTC", 1.0, 1));
        q.push(quote("ETH", 2.0, 2));

        assert_eq!(q.push(quote("SOL", 3.0, 3)), PushOutcome::DroppedFull);
        // Coalescing into BTC succeeds and clears the streak
        assert_eq!(q.push(quote("BTC", 4.0, 4)), PushOutcome::Coalesced);
        assert_eq!(q.push(quote("SOL", 5.0, 5)), PushOutcome::DroppedFull);
        assert_eq!(q.push(quote("ADA", 6.0, 6)), PushOutcome::DroppedFull);
        assert!(!q.is_poisoned());
    }

    #[tokio::test]
    async fn test_recv_returns_pushed_frame() {
        let q = Arc::new(small_queue(8, 3));

        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(quote("BTC", 1.0, 1));

        let received = consumer.await.unwrap().unwrap();
        assert_eq!(received.symbol, Symbol::new("BTC"));
    }

    #[tokio::test]
    async fn test_recv_observes_poisoning() {
        let q = small_queue(1, 1);
        q.push(quote("BTC", 1.0, 1));
        assert_eq!(q.push(quote("ETH", 2.0, 2)), PushOutcome::Poisoned);

        assert_eq!(q.recv().await, Err(EngineError::SlowConsumer));
    }

    #[tokio::test]
    async fn test_close_wakes_receiver_after_backlog() {
        let q = small_queue(8, 3);
        q.push(quote("BTC", 1.0, 1));
        q.close();

        // Backlog still drains, then the close is observed
        assert!(q.recv().await.is_ok());
        assert_eq!(q.recv().await, Err(EngineError::QueueClosed));
        assert_eq!(q.push(quote("ETH", 2.0, 2)), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_per_symbol_delivery_order_non_decreasing() {
        let q = small_queue(4, 3);
        q.push(quote("BTC", 1.0, 10));
        q.push(quote("ETH", 2.0, 11));
        q.push(quote("BTC", 3.0, 12));
        q.push(quote("BTC", 2.5, 11)); // late arrival, dropped

        let mut last_btc = 0;
        while let Some(frame) = q.pop() {
            if frame.symbol == Symbol::new("BTC") {
                assert!(frame.observed_at_ms >= last_btc);
                last_btc = frame.observed_at_ms;
            }
        }
        assert_eq!(last_btc, 12);
    }
}
