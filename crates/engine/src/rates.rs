//! Currency conversion-rate table.
//!
//! Applies a supplied rate table to re-express quotes in a client's display
//! currency. A missing pair is always an explicit error; the table never
//! invents a 1:1 rate.

use crate::error::EngineError;
use dashmap::DashMap;
use pricestream_core::{FixedPoint, Quote, QuoteCurrency, SignedFixedPoint};

/// Conversion rates keyed by (from, to) currency pair.
///
/// Owned service, shared by handle. The FX updater task writes it; sessions
/// read it at delivery time.
#[derive(Debug, Default)]
pub struct ConversionTable {
    rates: DashMap<(QuoteCurrency, QuoteCurrency), f64>,
}

impl ConversionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rate for a pair and its inverse.
    pub fn set_rate(&self, from: QuoteCurrency, to: QuoteCurrency, rate: f64) {
        if from == to || rate <= 0.0 {
            return;
        }
        self.rates.insert((from, to), rate);
        self.rates.insert((to, from), 1.0 / rate);
    }

    /// Look up the rate for a pair. Identity pairs are always 1.
    pub fn rate(&self, from: QuoteCurrency, to: QuoteCurrency) -> Result<f64, EngineError> {
        if from == to {
            return Ok(1.0);
        }
        self.rates
            .get(&(from, to))
            .map(|r| *r)
            .ok_or(EngineError::ConversionUnavailable { from, to })
    }

    /// Re-express a quote in another currency.
    ///
    /// Price, absolute change, and volume scale by the rate; the relative
    /// change and timestamps are currency-independent and carry over.
    pub fn convert_quote(&self, quote: &Quote, to: QuoteCurrency) -> Result<Quote, EngineError> {
        let rate = self.rate(quote.quote_currency, to)?;
        if quote.quote_currency == to {
            return Ok(quote.clone());
        }

        Ok(Quote {
            symbol: quote.symbol.clone(),
            quote_currency: to,
            price: FixedPoint::from_f64(quote.price.to_f64() * rate),
            change_24h_abs: SignedFixedPoint::from_f64(quote.change_24h_abs.to_f64() * rate),
            change_24h_bps: quote.change_24h_bps,
            volume_24h: FixedPoint::from_f64(quote.volume_24h.to_f64() * rate),
            observed_at_ms: quote.observed_at_ms,
            source: quote.source,
        })
    }

    /// Number of configured directed pairs.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricestream_core::{now_ms, Provider, Symbol};

    fn usd_quote(price: f64) -> Quote {
        Quote {
            symbol: Symbol::new("BTC"),
            quote_currency: QuoteCurrency::USD,
            price: FixedPoint::from_f64(price),
            change_24h_abs: SignedFixedPoint::from_f64(-100.0),
            change_24h_bps: -250,
            volume_24h: FixedPoint::from_f64(1000.0),
            observed_at_ms: now_ms(),
            source: Provider::CoinGecko,
        }
    }

    #[test]
    fn test_identity_rate() {
        let table = ConversionTable::new();
        assert_eq!(table.rate(QuoteCurrency::USD, QuoteCurrency::USD), Ok(1.0));
    }

    #[test]
    fn test_missing_pair_is_an_error_not_a_passthrough() {
        // Requesting INR with no USD->INR rate configured must error,
        // never fabricate a value.
        let table = ConversionTable::new();
        let quote = usd_quote(47000.0);

        let result = table.convert_quote(&quote, QuoteCurrency::INR);
        assert_eq!(
            result,
            Err(EngineError::ConversionUnavailable {
                from: QuoteCurrency::USD,
                to: QuoteCurrency::INR,
            })
        );
    }

    #[test]
    fn test_convert_scales_price_change_and_volume() {
        let table = ConversionTable::new();
        table.set_rate(QuoteCurrency::USD, QuoteCurrency::EUR, 0.9);

        let converted = table
            .convert_quote(&usd_quote(1000.0), QuoteCurrency::EUR)
            .unwrap();
        assert_eq!(converted.quote_currency, QuoteCurrency::EUR);
        assert!((converted.price.to_f64() - 900.0).abs() < 1e-6);
        assert!((converted.change_24h_abs.to_f64() + 90.0).abs() < 1e-6);
        assert!((converted.volume_24h.to_f64() - 900.0).abs() < 1e-6);
        // Relative change is currency-independent
        assert_eq!(converted.change_24h_bps, -250);
    }

    #[test]
    fn test_inverse_rate_set_automatically() {
        let table = ConversionTable::new();
        table.set_rate(QuoteCurrency::USD, QuoteCurrency::KRW, 1350.0);

        let back = table.rate(QuoteCurrency::KRW, QuoteCurrency::USD).unwrap();
        assert!((back - 1.0 / 1350.0).abs() < 1e-12);
    }

    #[test]
    fn test_nonpositive_rate_ignored() {
        let table = ConversionTable::new();
        table.set_rate(QuoteCurrency::USD, QuoteCurrency::EUR, 0.0);
        assert!(table.is_empty());
    }
}
