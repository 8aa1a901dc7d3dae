//! Connection-to-symbol subscription registry.
//!
//! Authoritative mapping consulted by the fetcher (what to poll) and the
//! dispatcher (who to notify). Both directions of the relation live under
//! one lock so a reader can never observe a half-applied change.

use crate::error::EngineError;
use pricestream_core::Symbol;
use pricestream_feeds::SymbolSource;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

/// Identifies one client connection for the lifetime of its session.
pub type ConnectionId = u64;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum symbols one connection may hold
    pub max_subscriptions_per_connection: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_connection: 100,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_connection: HashMap<ConnectionId, HashSet<Symbol>>,
    by_symbol: HashMap<Symbol, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn add(&mut self, connection: ConnectionId, symbol: Symbol) -> bool {
        let added = self
            .by_connection
            .entry(connection)
            .or_default()
            .insert(symbol.clone());
        if added {
            self.by_symbol.entry(symbol).or_default().insert(connection);
        }
        added
    }

    fn remove(&mut self, connection: ConnectionId, symbol: &Symbol) -> bool {
        let removed = self
            .by_connection
            .get_mut(&connection)
            .map(|set| set.remove(symbol))
            .unwrap_or(false);
        if removed {
            if let Some(subscribers) = self.by_symbol.get_mut(symbol) {
                subscribers.remove(&connection);
                if subscribers.is_empty() {
                    self.by_symbol.remove(symbol);
                }
            }
        }
        removed
    }
}

/// Thread-safe subscription registry.
///
/// All mutating operations are idempotent: double-subscribe and
/// unsubscribe-of-absent are no-ops.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
    config: RegistryConfig,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            config,
        }
    }

    /// Subscribe a connection to symbols.
    ///
    /// Fails with `SubscriptionLimitExceeded` if the resulting set would
    /// exceed the per-connection cap; in that case nothing is applied.
    /// Returns the number of newly added subscriptions.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        symbols: &[Symbol],
    ) -> Result<usize, EngineError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");

        let current = inner
            .by_connection
            .get(&connection)
            .map(|s| s.len())
            .unwrap_or(0);
        let new: usize = symbols
            .iter()
            .filter(|sym| {
                !inner
                    .by_connection
                    .get(&connection)
                    .map(|s| s.contains(*sym))
                    .unwrap_or(false)
            })
            .count();
        let limit = self.config.max_subscriptions_per_connection;
        if current + new > limit {
            return Err(EngineError::SubscriptionLimitExceeded { limit });
        }

        let mut added = 0;
        for symbol in symbols {
            if inner.add(connection, symbol.clone()) {
                added += 1;
            }
        }
        if added > 0 {
            debug!(connection, added, "Subscribed");
        }
        Ok(added)
    }

    /// Unsubscribe a connection from symbols. Unknown symbols are no-ops.
    /// Returns the number of removed subscriptions.
    pub fn unsubscribe(&self, connection: ConnectionId, symbols: &[Symbol]) -> usize {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let mut removed = 0;
        for symbol in symbols {
            if inner.remove(connection, symbol) {
                removed += 1;
            }
        }
        removed
    }

    /// Drop every subscription a connection holds (called on disconnect).
    /// Returns the number of removed subscriptions.
    pub fn unsubscribe_all(&self, connection: ConnectionId) -> usize {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Some(symbols) = inner.by_connection.remove(&connection) else {
            return 0;
        };
        for symbol in &symbols {
            if let Some(subscribers) = inner.by_symbol.get_mut(symbol) {
                subscribers.remove(&connection);
                if subscribers.is_empty() {
                    inner.by_symbol.remove(symbol);
                }
            }
        }
        debug!(connection, removed = symbols.len(), "Unsubscribed all");
        symbols.len()
    }

    /// Atomically replace a connection's subscription set.
    ///
    /// Diffs old vs new under the write lock: removed symbols are
    /// unsubscribed, added symbols subscribed, shared symbols untouched.
    /// No concurrent reader ever sees the connection subscribed to neither
    /// set, nor to a symbol absent from both.
    pub fn replace(
        &self,
        connection: ConnectionId,
        new_set: &HashSet<Symbol>,
    ) -> Result<(), EngineError> {
        let limit = self.config.max_subscriptions_per_connection;
        if new_set.len() > limit {
            return Err(EngineError::SubscriptionLimitExceeded { limit });
        }

        let mut inner = self.inner.write().expect("registry lock poisoned");

        let old_set = inner
            .by_connection
            .get(&connection)
            .cloned()
            .unwrap_or_default();

        for symbol in old_set.difference(new_set) {
            let symbol = symbol.clone();
            inner.remove(connection, &symbol);
        }
        for symbol in new_set.difference(&old_set) {
            inner.add(connection, symbol.clone());
        }

        debug!(
            connection,
            old = old_set.len(),
            new = new_set.len(),
            "Replaced subscription set"
        );
        Ok(())
    }

    /// Symbols with at least one subscriber (the fetcher's poll set).
    pub fn symbols_with_subscribers(&self) -> HashSet<Symbol> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.by_symbol.keys().cloned().collect()
    }

    /// Connections subscribed to a symbol (the dispatcher's fan-out set).
    pub fn subscribers_of(&self, symbol: &Symbol) -> Vec<ConnectionId> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .by_symbol
            .get(symbol)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current subscription set of a connection.
    pub fn connection_symbols(&self, connection: ConnectionId) -> HashSet<Symbol> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .by_connection
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of connections holding at least one subscription.
    pub fn connection_count(&self) -> usize {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.by_connection.len()
    }
}

impl SymbolSource for SubscriptionRegistry {
    fn watched_symbols(&self) -> Vec<Symbol> {
        self.symbols_with_subscribers().into_iter().collect()
    }
}
