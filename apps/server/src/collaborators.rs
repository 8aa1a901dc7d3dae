//! External collaborator seams: auth and portfolio storage.
//!
//! The engine consults these exactly twice per session lifecycle concern:
//! once to authorize a new connection, and whenever a symbol set must be
//! resolved from the caller's active portfolio. Everything behind the
//! traits (JWTs, session stores, the portfolio database) belongs to other
//! services.

use async_trait::async_trait;
use pricestream_core::Symbol;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Opaque user identity handed back by the auth collaborator.
pub type UserId = String;

/// Session validation failures. Terminal for the connection; no retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("session expired")]
    SessionExpired,

    #[error("auth backend unavailable: {0}")]
    Unavailable(String),
}

/// Validates a session credential once, at connection start.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate_session(&self, credential: &str) -> Result<UserId, AuthError>;
}

/// Resolves the symbols referenced by a user's active portfolio.
#[async_trait]
pub trait PortfolioDirectory: Send + Sync {
    async fn active_portfolio_symbols(&self, user: &str) -> Vec<Symbol>;
}

/// In-memory token validator, for development wiring and tests.
#[derive(Debug, Default)]
pub struct StaticSessionValidator {
    tokens: HashMap<String, UserId>,
}

impl StaticSessionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential for a user.
    pub fn with_token(mut self, credential: impl Into<String>, user: impl Into<String>) -> Self {
        self.tokens.insert(credential.into(), user.into());
        self
    }
}

#[async_trait]
impl SessionValidator for StaticSessionValidator {
    async fn validate_session(&self, credential: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(credential)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}

/// In-memory portfolio directory, for development wiring and tests.
#[derive(Debug, Default)]
pub struct StaticPortfolioDirectory {
    portfolios: RwLock<HashMap<UserId, Vec<Symbol>>>,
    default_symbols: Vec<Symbol>,
}

impl StaticPortfolioDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbols served for users with no portfolio of their own.
    pub fn with_default(mut self, symbols: Vec<Symbol>) -> Self {
        self.default_symbols = symbols;
        self
    }

    /// Set a user's active portfolio symbols.
    pub fn set_portfolio(&self, user: impl Into<String>, symbols: Vec<Symbol>) {
        self.portfolios
            .write()
            .expect("portfolio lock poisoned")
            .insert(user.into(), symbols);
    }
}

#[async_trait]
impl PortfolioDirectory for StaticPortfolioDirectory {
    async fn active_portfolio_symbols(&self, user: &str) -> Vec<Symbol> {
        self.portfolios
            .read()
            .expect("portfolio lock poisoned")
            .get(user)
            .cloned()
            .unwrap_or_else(|| self.default_symbols.clone())
    }
}
