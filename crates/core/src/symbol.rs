//! Asset symbol type.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Asset symbol (e.g., "BTC", "ETH", "SOL").
///
/// Stored uppercase so that lookups from client input and provider
/// responses land on the same key regardless of the casing they arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(CompactString);

impl Symbol {
    /// Create a symbol, normalizing to uppercase.
    pub fn new(s: &str) -> Self {
        Self(CompactString::new(s.trim().to_uppercase()))
    }

    /// Get the symbol as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Check if the symbol is empty (e.g., from blank client input).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_uppercase_normalization() {
        assert_eq!(Symbol::new("btc"), Symbol::new("BTC"));
        assert_eq!(Symbol::new(" eth "), Symbol::new("ETH"));
        assert_eq!(Symbol::new("Sol").as_str(), "SOL");
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Symbol::new("btc")), "BTC");
    }

    #[test]
    fn test_empty() {
        assert!(Symbol::new("  ").is_empty());
        assert!(!Symbol::new("BTC").is_empty());
    }
}
