//! Market-data provider identifiers.

use serde::{Deserialize, Serialize};

/// Upstream market-data provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Provider {
    /// CoinGecko batch quote API (primary)
    CoinGecko = 100,
    /// CoinCap assets API (fallback)
    CoinCap = 101,
}

impl Provider {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            100 => Some(Provider::CoinGecko),
            101 => Some(Provider::CoinCap),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Get display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::CoinGecko => "coingecko",
            Provider::CoinCap => "coincap",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "coingecko" => Some(Provider::CoinGecko),
            "coincap" => Some(Provider::CoinCap),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
