//! CoinCap assets provider (fallback).

use crate::error::ProviderError;
use crate::provider::{change_abs_from_pct, coin_id, symbol_for_coin_id, ProviderSettings, QuoteProvider};
use async_trait::async_trait;
use pricestream_core::{now_ms, FixedPoint, Provider, Quote, QuoteCurrency, SignedFixedPoint, Symbol};
use tracing::debug;

/// CoinCap `/v2/assets` fetcher.
///
/// CoinCap reports numeric fields as JSON strings, so every field goes
/// through `as_str().parse::<f64>()`. A single response carries all
/// requested assets plus a server timestamp used as `observed_at`.
pub struct CoinCapProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_symbols: usize,
}

impl CoinCapProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.coincap.io";

    /// Build a provider from settings.
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.call_timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            api_key: settings.api_key.clone(),
            max_symbols: settings.max_symbols_per_call,
        })
    }

    /// Parse a string-encoded numeric field.
    fn parse_field(entry: &serde_json::Value, field: &str) -> Option<f64> {
        entry[field].as_str().and_then(|s| s.parse::<f64>().ok())
    }

    /// Parse one asset entry. Returns `None` on a missing/garbled price.
    fn parse_entry(symbol: Symbol, entry: &serde_json::Value, observed_at_ms: u64) -> Option<Quote> {
        let price = Self::parse_field(entry, "priceUsd")?;
        let pct = Self::parse_field(entry, "changePercent24Hr").unwrap_or(0.0);
        let volume = Self::parse_field(entry, "volumeUsd24Hr").unwrap_or(0.0);

        Some(Quote {
            symbol,
            quote_currency: QuoteCurrency::USD,
            price: FixedPoint::from_f64(price),
            change_24h_abs: SignedFixedPoint::from_f64(change_abs_from_pct(price, pct)),
            change_24h_bps: (pct * 100.0).round() as i32,
            volume_24h: FixedPoint::from_f64(volume),
            observed_at_ms,
            source: Provider::CoinCap,
        })
    }
}

#[async_trait]
impl QuoteProvider for CoinCapProvider {
    fn provider(&self) -> Provider {
        Provider::CoinCap
    }

    fn max_symbols_per_call(&self) -> usize {
        self.max_symbols
    }

    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, ProviderError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = symbols.iter().map(coin_id).collect();
        let url = format!("{}/v2/assets?ids={}", self.base_url, ids.join(","));

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::HttpStatus(status.as_u16()));
        }

        let json: serde_json::Value = response.json().await?;

        // Response: {"data":[{"id":"bitcoin","symbol":"BTC","priceUsd":"47000.1",...}],"timestamp":1700000000000}
        let observed_at_ms = json["timestamp"].as_u64().unwrap_or_else(now_ms);
        let data = json["data"]
            .as_array()
            .ok_or_else(|| ProviderError::ParseError("no data array".to_string()))?;

        let mut quotes = Vec::with_capacity(data.len());
        for entry in data {
            let Some(id) = entry["id"].as_str() else {
                continue;
            };
            let Some(symbol) = symbol_for_coin_id(id, symbols) else {
                debug!(id = %id, "CoinCap: unrequested asset in response, skipping");
                continue;
            };
            match Self::parse_entry(symbol.clone(), entry, observed_at_ms) {
                Some(quote) => quotes.push(quote),
                None => debug!(%symbol, "CoinCap: unparseable entry, skipping"),
            }
        }

        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry() -> serde_json::Value {
        serde_json::json!({
            "id": "bitcoin",
            "symbol": "BTC",
            "priceUsd": "47000.25",
            "changePercent24Hr": "-2.5",
            "volumeUsd24Hr": "28000000000.0"
        })
    }

    #[test]
    fn test_parse_string_encoded_fields() {
        let quote =
            CoinCapProvider::parse_entry(Symbol::new("BTC"), &entry(), 1_700_000_000_000).unwrap();

        assert!((quote.price.to_f64() - 47000.25).abs() < 1e-6);
        assert_eq!(quote.change_24h_bps, -250);
        assert!((quote.volume_24h.to_f64() - 28_000_000_000.0).abs() < 1.0);
        assert_eq!(quote.observed_at_ms, 1_700_000_000_000);
        assert_eq!(quote.source, Provider::CoinCap);
    }

    #[test]
    fn test_parse_entry_rejects_garbled_price() {
        let mut bad = entry();
        bad["priceUsd"] = serde_json::json!("not-a-number");
        assert!(CoinCapProvider::parse_entry(Symbol::new("BTC"), &bad, 0).is_none());

        let mut missing = entry();
        missing.as_object_mut().unwrap().remove("priceUsd");
        assert!(CoinCapProvider::parse_entry(Symbol::new("BTC"), &missing, 0).is_none());
    }
}
