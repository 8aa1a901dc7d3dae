//! Fetch event types for communication between the fetcher and the dispatcher.
//!
//! The fetcher normalizes provider responses and emits these over an mpsc
//! channel, keeping provider plumbing out of the distribution path.

use pricestream_core::{Provider, Quote};
use std::time::Duration;

/// Message sent from the fetcher to the downstream dispatcher.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// Normalized quotes from one successful provider call.
    Quotes(Vec<Quote>),
    /// Circuit breaker opened; the provider is routed around for the
    /// given cooldown.
    ProviderDown(Provider, Duration),
    /// Provider recovered: a half-open probe succeeded and the breaker
    /// re-closed.
    ProviderUp(Provider),
}

impl FetchEvent {
    /// Number of quotes carried by this event.
    pub fn quote_count(&self) -> usize {
        match self {
            FetchEvent::Quotes(quotes) => quotes.len(),
            _ => 0,
        }
    }
}
