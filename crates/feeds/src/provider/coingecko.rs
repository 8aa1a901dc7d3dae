//! CoinGecko batch quote provider (primary).

use crate::error::ProviderError;
use crate::provider::{change_abs_from_pct, coin_id, ProviderSettings, QuoteProvider};
use async_trait::async_trait;
use pricestream_core::{now_ms, FixedPoint, Provider, Quote, QuoteCurrency, SignedFixedPoint, Symbol};
use tracing::debug;

/// CoinGecko `/simple/price` fetcher.
///
/// One call covers up to `max_symbols_per_call` coins; 24h change, 24h
/// volume and the provider-side observation timestamp ride along in the
/// same response.
pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_symbols: usize,
}

impl CoinGeckoProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.coingecko.com/api/v3";

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

    /// Parse one coin's entry from the `/simple/price` response.
    ///
    /// Returns `None` when the price field is absent or not a number, so a
    /// single bad coin never aborts the batch.
    fn parse_entry(symbol: Symbol, entry: &serde_json::Value) -> Option<Quote> {
        let price = entry["usd"].as_f64()?;
        let pct = entry["usd_24h_change"].as_f64().unwrap_or(0.0);
        let volume = entry["usd_24h_vol"].as_f64().unwrap_or(0.0);
        let observed_at_ms = entry["last_updated_at"]
            .as_u64()
            .map(|secs| secs * 1000)
            .unwrap_or_else(now_ms);

        Some(Quote {
            symbol,
            quote_currency: QuoteCurrency::USD,
            price: FixedPoint::from_f64(price),
            change_24h_abs: SignedFixedPoint::from_f64(change_abs_from_pct(price, pct)),
            change_24h_bps: (pct * 100.0).round() as i32,
            volume_24h: FixedPoint::from_f64(volume),
            observed_at_ms,
            source: Provider::CoinGecko,
        })
    }
}

#[async_trait]
impl QuoteProvider for CoinGeckoProvider {
    fn provider(&self) -> Provider {
        Provider::CoinGecko
    }

    fn max_symbols_per_call(&self) -> usize {
        self.max_symbols
    }

    async fn fetch_quotes(&self, symbols: &[Symbol]) -> Result<Vec<Quote>, ProviderError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = symbols.iter().map(coin_id).collect();
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true&include_24hr_vol=true&include_last_updated_at=true",
            self.base_url,
            ids.join(",")
        );

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", key);
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

        // Response is keyed by coin id:
        // {"bitcoin":{"usd":47000.1,"usd_24h_change":-2.5,"usd_24h_vol":...,"last_updated_at":...}, ...}
        let mut quotes = Vec::with_capacity(symbols.len());
        for (id, symbol) in ids.iter().zip(symbols.iter().cloned()) {
            let entry = &json[id.as_str()];
            if entry.is_null() {
                debug!(%symbol, id = %id, "CoinGecko: symbol missing from response");
                continue;
            }
            match Self::parse_entry(symbol.clone(), entry) {
                Some(quote) => quotes.push(quote),
                None => debug!(%symbol, "CoinGecko: unparseable entry, skipping"),
            }
        }

        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> serde_json::Value {
        serde_json::json!({
            "bitcoin": {
                "usd": 47000.25,
                "usd_24h_change": -2.5,
                "usd_24h_vol": 28_000_000_000.0f64,
                "last_updated_at": 1_700_000_000u64
            },
            "ethereum": {
                "usd": 3000.0
            },
            "solana": {
                "usd_24h_change": 1.0
            }
        })
    }

    #[test]
    fn test_parse_full_entry() {
        let json = fixture();
        let quote = CoinGeckoProvider::parse_entry(Symbol::new("BTC"), &json["bitcoin"]).unwrap();

        assert_eq!(quote.symbol, Symbol::new("BTC"));
        assert_eq!(quote.quote_currency, QuoteCurrency::USD);
        assert!((quote.price.to_f64() - 47000.25).abs() < 1e-6);
        assert_eq!(quote.change_24h_bps, -250);
        assert!(quote.change_24h_abs.is_negative());
        assert_eq!(quote.observed_at_ms, 1_700_000_000_000);
        assert_eq!(quote.source, Provider::CoinGecko);
    }

    #[test]
    fn test_parse_entry_defaults_optional_fields() {
        let json = fixture();
        let quote = CoinGeckoProvider::parse_entry(Symbol::new("ETH"), &json["ethereum"]).unwrap();

        assert_eq!(quote.change_24h_bps, 0);
        assert_eq!(quote.volume_24h, FixedPoint(0));
        // No provider timestamp: falls back to local clock
        assert!(quote.observed_at_ms > 1_700_000_000_000);
    }

    #[test]
    fn test_parse_entry_without_price_is_skipped() {
        let json = fixture();
        assert!(CoinGeckoProvider::parse_entry(Symbol::new("SOL"), &json["solana"]).is_none());
    }
}
