//! Quote data structures for real-time market data.

use crate::{Provider, QuoteCurrency, Symbol};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Fixed-point number with 8 decimal places.
/// Used for precise price representation without floating-point errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixedPoint(pub u64);

impl FixedPoint {
    /// Number of decimal places
    pub const DECIMALS: u32 = 8;
    /// Scale factor: 10^8 (fits comfortably in u64 for most prices)
    pub const SCALE: u64 = 100_000_000;

    /// Create from f64 (provider responses arrive as JSON numbers)
    pub fn from_f64(value: f64) -> Self {
        Self((value * Self::SCALE as f64) as u64)
    }

    /// Convert to f64 (for the wire format and display)
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl Add for FixedPoint {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for FixedPoint {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

/// Signed fixed-point number, same scale as [`FixedPoint`].
/// Used for 24h price deltas, which go negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignedFixedPoint(pub i64);

impl SignedFixedPoint {
    /// Create from f64.
    pub fn from_f64(value: f64) -> Self {
        Self((value * FixedPoint::SCALE as f64) as i64)
    }

    /// Convert to f64.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / FixedPoint::SCALE as f64
    }

    /// True if the delta is negative.
    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

/// Cache key for a quoted price: (symbol, quote currency).
pub type QuoteKey = (Symbol, QuoteCurrency);

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single market observation for one asset in one currency.
///
/// Immutable once produced; a newer observation for the same
/// (symbol, currency) key replaces the prior one, never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Asset symbol (e.g., "BTC")
    pub symbol: Symbol,
    /// Currency the price is expressed in
    pub quote_currency: QuoteCurrency,
    /// Last traded price
    pub price: FixedPoint,
    /// Absolute 24h change in price units
    pub change_24h_abs: SignedFixedPoint,
    /// Relative 24h change in basis points
    pub change_24h_bps: i32,
    /// 24h trading volume in quote currency units
    pub volume_24h: FixedPoint,
    /// When the provider observed this price (unix milliseconds)
    pub observed_at_ms: u64,
    /// Provider that produced the observation
    pub source: Provider,
}

impl Quote {
    /// Cache key for this quote.
    pub fn key(&self) -> QuoteKey {
        (self.symbol.clone(), self.quote_currency)
    }

    /// Relative 24h change as a percentage (e.g., 2.5 for +2.5%).
    pub fn change_24h_pct(&self) -> f64 {
        self.change_24h_bps as f64 / 100.0
    }
}
