//! In-process price distribution services.
//!
//! The engine owns the shared state between ingestion and delivery: the
//! price cache, the conversion-rate table, the subscription registry, the
//! per-connection outbound queues, and the dispatcher that fans cache
//! changes out to subscribers. All services are internally synchronized
//! and passed around as `Arc` handles; there are no ambient singletons.

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod rates;
pub mod registry;
pub mod stats;

pub use cache::{CacheConfig, CacheEntry, PriceCache, Staleness};
pub use dispatcher::Dispatcher;
pub use error::EngineError;
pub use queue::{OutboundQueue, PushOutcome, QueueConfig};
pub use rates::ConversionTable;
pub use registry::{ConnectionId, RegistryConfig, SubscriptionRegistry};
pub use stats::{EngineStats, StatsSummary};
