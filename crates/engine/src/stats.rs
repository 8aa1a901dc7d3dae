//! Engine statistics.

use pricestream_core::now_ms;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the distribution engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Quotes accepted into the cache.
    pub quotes_ingested: AtomicU64,
    /// Out-of-order writes rejected by the cache.
    pub writes_rejected: AtomicU64,
    /// Fan-out passes executed by the dispatcher.
    pub dispatches: AtomicU64,
    /// Frames enqueued onto outbound queues.
    pub frames_enqueued: AtomicU64,
    /// Frames coalesced away (superseded by a newer same-symbol update).
    pub frames_coalesced: AtomicU64,
    /// Frames dropped on full queues.
    pub frames_dropped: AtomicU64,
    /// Sessions force-closed for slow consumption.
    pub slow_consumer_disconnects: AtomicU64,
    /// Sessions opened.
    pub sessions_opened: AtomicU64,
    /// Sessions closed.
    pub sessions_closed: AtomicU64,
    /// Start time in milliseconds.
    pub started_at_ms: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            started_at_ms: AtomicU64::new(now_ms()),
            ..Default::default()
        }
    }

    pub fn record_ingested(&self) {
        self.quotes_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_write(&self) {
        self.writes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.frames_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.frames_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_consumer(&self) {
        self.slow_consumer_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        (now_ms().saturating_sub(self.started_at_ms.load(Ordering::Relaxed))) / 1000
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            quotes_ingested: self.quotes_ingested.load(Ordering::Relaxed),
            writes_rejected: self.writes_rejected.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_coalesced: self.frames_coalesced.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            slow_consumer_disconnects: self.slow_consumer_disconnects.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            uptime_secs: self.uptime_secs(),
        }
    }
}

/// Point-in-time snapshot of the counters.
#[derive(Debug, Clone)]
pub struct StatsSummary {
    pub quotes_ingested: u64,
    pub writes_rejected: u64,
    pub dispatches: u64,
    pub frames_enqueued: u64,
    pub frames_coalesced: u64,
    pub frames_dropped: u64,
    pub slow_consumer_disconnects: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub uptime_secs: u64,
}
