//! WebSocket endpoint and wire frame types.
//!
//! One persistent, bidirectional JSON channel per client. Numeric fields
//! serialize as f64 on the wire; fixed-point stays internal.

use crate::session::{self, SessionServices};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use pricestream_core::Quote;
use pricestream_engine::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Client -> server control messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message of every session: the credential to validate.
    Auth { credential: String },
    /// Add symbols to the subscription set.
    Subscribe { symbols: Vec<String> },
    /// Remove symbols from the subscription set.
    Unsubscribe { symbols: Vec<String> },
    /// Atomically swap the subscription set.
    Replace { symbols: Vec<String> },
    /// Re-resolve the subscription set from the active portfolio.
    SwitchPortfolio,
    /// Change the display currency for quote frames.
    SetCurrency { currency: String },
    /// Keepalive.
    Ping,
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Quote(WsQuoteFrame),
    Error(WsErrorFrame),
    Pong,
}

/// Quote frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsQuoteFrame {
    pub symbol: String,
    pub currency: String,
    pub price: f64,
    pub change_24h_abs: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
    /// Provider-side observation time (unix milliseconds)
    pub observed_at: u64,
    /// True when the value is older than the freshness window
    pub stale: bool,
}

impl WsQuoteFrame {
    pub fn from_quote(quote: &Quote, stale: bool) -> Self {
        Self {
            symbol: quote.symbol.to_string(),
            currency: quote.quote_currency.to_string(),
            price: quote.price.to_f64(),
            change_24h_abs: quote.change_24h_abs.to_f64(),
            change_24h_pct: quote.change_24h_pct(),
            volume_24h: quote.volume_24h.to_f64(),
            observed_at: quote.observed_at_ms,
            stale,
        }
    }
}

/// Error frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsErrorFrame {
    pub code: String,
    pub message: String,
}

impl WsErrorFrame {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new("auth_failed", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }
}

impl From<&EngineError> for WsErrorFrame {
    fn from(err: &EngineError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Create the server router.
pub fn create_router(services: Arc<SessionServices>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(services)
}

/// Health check handler.
async fn health_handler() -> &'static str {
    "OK"
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<Arc<SessionServices>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::handle_socket(socket, services))
}

/// Bind and serve in the background.
pub async fn start_server(
    services: Arc<SessionServices>,
    port: u16,
) -> Result<tokio::task::JoinHandle<()>, Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(services);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://0.0.0.0:{}", port);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("WebSocket server error: {}", e);
        }
    }))
}
