//! Fiat conversion-rate updater.
//!
//! Populates the engine's conversion table from a public FX API so quote
//! frames can be re-expressed in a client's display currency. Quotes are
//! cached in USD, so USD -> fiat pairs (and their inverses) are all the
//! table needs.

use pricestream_core::QuoteCurrency;
use pricestream_engine::ConversionTable;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FX_API_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// Currencies kept in sync with the FX API (USD is the base).
const TRACKED: [QuoteCurrency; 5] = [
    QuoteCurrency::EUR,
    QuoteCurrency::GBP,
    QuoteCurrency::JPY,
    QuoteCurrency::KRW,
    QuoteCurrency::INR,
];

/// Extract the tracked USD -> fiat rates from an FX API response.
fn extract_rates(json: &serde_json::Value) -> Vec<(QuoteCurrency, f64)> {
    TRACKED
        .iter()
        .filter_map(|currency| {
            json["rates"][currency.as_str()]
                .as_f64()
                .filter(|rate| *rate > 0.0)
                .map(|rate| (*currency, rate))
        })
        .collect()
}

/// Fetch current rates and apply them to the table.
///
/// Returns the number of pairs updated.
pub async fn refresh_rates(
    table: &ConversionTable,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let json: serde_json::Value = client.get(FX_API_URL).send().await?.json().await?;

    let rates = extract_rates(&json);
    if rates.is_empty() {
        return Err("no usable rates in FX response".into());
    }

    let count = rates.len();
    for (currency, rate) in rates {
        table.set_rate(QuoteCurrency::USD, currency, rate);
    }
    Ok(count)
}

/// Run the FX updater loop.
///
/// A failed refresh keeps the previous table in place; conversions keep
/// working off the last good rates.
pub async fn run_fx_updater(table: Arc<ConversionTable>, interval: Duration) {
    info!("Starting FX rate updater");

    loop {
        match refresh_rates(&table).await {
            Ok(count) => info!(pairs = count, "Updated FX conversion rates"),
            Err(e) => warn!("Failed to refresh FX rates: {}", e),
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_rates() {
        let json = serde_json::json!({
            "result": "success",
            "rates": {
                "USD": 1.0,
                "EUR": 0.92,
                "KRW": 1350.5,
                "JPY": 149.2
            }
        });

        let rates = extract_rates(&json);
        assert_eq!(rates.len(), 3);
        assert!(rates.contains(&(QuoteCurrency::EUR, 0.92)));
        assert!(rates.contains(&(QuoteCurrency::KRW, 1350.5)));
    }

    #[test]
    fn test_extract_rates_skips_garbage() {
        let json = serde_json::json!({
            "rates": {
                "EUR": "not-a-number",
                "KRW": -5.0,
                "INR": 83.1
            }
        });

        let rates = extract_rates(&json);
        assert_eq!(rates, vec![(QuoteCurrency::INR, 83.1)]);
    }

    #[test]
    fn test_extract_rates_empty_response() {
        let json = serde_json::json!({});
        assert!(extract_rates(&json).is_empty());
    }
}
