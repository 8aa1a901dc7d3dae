//! Provider-specific quote fetching.
//!
//! Each provider speaks its own HTTP contract; everything is normalized
//! into [`Quote`] before leaving this module.

mod coincap;
mod coingecko;

pub use coincap::CoinCapProvider;
pub use coingecko::CoinGeckoProvider;

use crate::error::ProviderError;
use async_trait::async_trait;
use pricestream_core::{Provider, Quote, Symbol};
use std::time::Duration;

/// Construction settings for a provider instance.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Which provider this configures
    pub provider: Provider,
    /// Base URL override (e.g., the CoinGecko pro endpoint)
    pub base_url: Option<String>,
    /// API key, if the account has one
    pub api_key: Option<String>,
    /// Maximum symbols the provider accepts in one batch call
    pub max_symbols_per_call: usize,
    /// Per-call HTTP timeout
    pub call_timeout: Duration,
}

impl ProviderSettings {
    /// Default settings for a provider.
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            base_url: None,
            api_key: None,
            max_symbols_per_call: 50,
            call_timeout: Duration::from_secs(10),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// A batch quote source.
///
/// Implementations fetch the latest observations for a set of symbols in
/// as few HTTP calls as the provider contract allows, and normalize the
/// response into [`Quote`]s. A symbol absent from the response is simply
/// omitted from the result; it never fails the batch.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Provider identity.
    fn provider(&self) -> Provider;

    /// Maximum symbols this provider accepts per call.
    fn max_symbols_per_call(&self) -> usize;

    /// Fetch current quotes for the given symbols (USD-quoted).
    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, ProviderError>;
}

/// Map an asset symbol to the coin id shared by CoinGecko and CoinCap
/// (e.g., "BTC" -> "bitcoin").
///
/// Unknown symbols fall back to the lowercased symbol, which is correct
/// for coins whose id happens to equal their name.
pub fn coin_id(symbol: &Symbol) -> String {
    const IDS: &[(&str, &str)] = &[
        ("BTC", "bitcoin"),
        ("ETH", "ethereum"),
        ("SOL", "solana"),
        ("XRP", "ripple"),
        ("ADA", "cardano"),
        ("DOGE", "dogecoin"),
        ("DOT", "polkadot"),
        ("MATIC", "matic-network"),
        ("AVAX", "avalanche-2"),
        ("LINK", "chainlink"),
        ("LTC", "litecoin"),
        ("ATOM", "cosmos"),
        ("UNI", "uniswap"),
        ("XLM", "stellar"),
        ("BNB", "binancecoin"),
        ("USDT", "tether"),
        ("USDC", "usd-coin"),
    ];

    IDS.iter()
        .find(|(sym, _)| *sym == symbol.as_str())
        .map(|(_, id)| (*id).to_string())
        .unwrap_or_else(|| symbol.as_str().to_lowercase())
}

/// Reverse of [`coin_id`]: recover the symbol a coin id was derived from.
pub(crate) fn symbol_for_coin_id(id: &str, requested: &[Symbol]) -> Option<Symbol> {
    requested
        .iter()
        .find(|sym| coin_id(sym) == id)
        .cloned()
}

/// Derive the absolute 24h change from the current price and the relative
/// 24h change in percent. Providers report the relative move; the absolute
/// delta follows from `price_now - price_now / (1 + pct/100)`.
pub(crate) fn change_abs_from_pct(price: f64, pct: f64) -> f64 {
    let denom = 1.0 + pct / 100.0;
    if denom.abs() < 1e-9 {
        return 0.0;
    }
    price - price / denom
}
