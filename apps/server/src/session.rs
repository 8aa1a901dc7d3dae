//! Connection session lifecycle.
//!
//! Each client connection walks `connecting -> authenticating -> active ->
//! draining -> closed`. The credential is validated exactly once, at the
//! start; afterwards the session serves control messages and pushes quote
//! frames until the client leaves, goes idle, or falls too far behind.

use crate::collaborators::{PortfolioDirectory, SessionValidator, UserId};
use crate::config::SessionSettings;
use crate::ws_server::{ClientMessage, ServerMessage, WsErrorFrame, WsQuoteFrame};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pricestream_core::{now_ms, Quote, QuoteCurrency, Symbol};
use pricestream_engine::{
    ConnectionId, ConversionTable, Dispatcher, EngineError, EngineStats, OutboundQueue,
    PriceCache, QueueConfig, SubscriptionRegistry,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Session lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Draining,
    Closed,
}

/// Why an active session left its serve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Client sent a close frame or dropped the transport.
    ClientClosed,
    /// No client activity within the idle window.
    Idle,
    /// Outbound queue poisoned by repeated overflow.
    SlowConsumer,
    /// Send or receive failed at the transport level.
    TransportError,
    /// Engine shutting down underneath the session.
    Shutdown,
}

/// Everything a session needs, passed as one handle.
pub struct SessionServices {
    pub validator: Arc<dyn SessionValidator>,
    pub portfolios: Arc<dyn PortfolioDirectory>,
    pub registry: Arc<SubscriptionRegistry>,
    pub cache: Arc<PriceCache>,
    pub rates: Arc<ConversionTable>,
    pub dispatcher: Arc<Dispatcher>,
    pub stats: Arc<EngineStats>,
    pub settings: SessionSettings,
    next_connection_id: AtomicU64,
}

impl SessionServices {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: Arc<dyn SessionValidator>,
        portfolios: Arc<dyn PortfolioDirectory>,
        registry: Arc<SubscriptionRegistry>,
        cache: Arc<PriceCache>,
        rates: Arc<ConversionTable>,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<EngineStats>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            validator,
            portfolios,
            registry,
            cache,
            rates,
            dispatcher,
            stats,
            settings,
            next_connection_id: AtomicU64::new(0),
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Transport-independent session logic: subscription control, snapshots,
/// and display-currency conversion. The socket loop below only moves
/// frames in and out.
struct SessionCore {
    connection: ConnectionId,
    user: UserId,
    display_currency: QuoteCurrency,
    services: Arc<SessionServices>,
}

impl SessionCore {
    fn new(connection: ConnectionId, user: UserId, services: Arc<SessionServices>) -> Self {
        Self {
            connection,
            user,
            display_currency: QuoteCurrency::USD,
            services,
        }
    }

    /// Resolve the initial subscription set from the caller's active
    /// portfolio and return the snapshot frames to send.
    async fn subscribe_from_portfolio(&self) -> Vec<ServerMessage> {
        let symbols: HashSet<Symbol> = self
            .services
            .portfolios
            .active_portfolio_symbols(&self.user)
            .await
            .into_iter()
            .collect();

        match self.services.registry.replace(self.connection, &symbols) {
            Ok(()) => {
                debug!(
                    connection = self.connection,
                    symbols = symbols.len(),
                    "Subscribed from active portfolio"
                );
                self.snapshot(symbols.iter())
            }
            Err(e) => vec![ServerMessage::Error(WsErrorFrame::from(&e))],
        }
    }

    /// Current cached values for the given symbols, stale-flagged, in the
    /// session's display currency. Symbols with no observation yet are
    /// silently absent; their first frame arrives with the next poll tick.
    fn snapshot<'a>(&self, symbols: impl Iterator<Item = &'a Symbol>) -> Vec<ServerMessage> {
        let now = now_ms();
        symbols
            .filter_map(|symbol| {
                let (quote, staleness) = self.services.cache.get(symbol, QuoteCurrency::USD, now);
                quote.map(|q| self.frame(q, staleness.is_stale()))
            })
            .collect()
    }

    /// Convert a quote to the display currency and wrap it for the wire.
    /// A missing conversion rate becomes an explicit error frame.
    fn frame(&self, quote: Quote, stale: bool) -> ServerMessage {
        match self.services.rates.convert_quote(&quote, self.display_currency) {
            Ok(converted) => ServerMessage::Quote(WsQuoteFrame::from_quote(&converted, stale)),
            Err(e) => ServerMessage::Error(WsErrorFrame::from(&e)),
        }
    }

    /// Apply one control message, returning the frames to send back.
    async fn handle_control(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Auth { .. } => vec![ServerMessage::Error(WsErrorFrame::bad_request(
                "already authenticated",
            ))],

            ClientMessage::Subscribe { symbols } => {
                let symbols = parse_symbols(&symbols);
                if symbols.is_empty() {
                    return vec![ServerMessage::Error(WsErrorFrame::bad_request(
                        "no symbols given",
                    ))];
                }
                match self.services.registry.subscribe(self.connection, &symbols) {
                    Ok(_) => self.snapshot(symbols.iter()),
                    Err(e) => vec![ServerMessage::Error(WsErrorFrame::from(&e))],
                }
            }

            ClientMessage::Unsubscribe { symbols } => {
                let symbols = parse_symbols(&symbols);
                self.services.registry.unsubscribe(self.connection, &symbols);
                Vec::new()
            }

            ClientMessage::Replace { symbols } => {
                let symbols: HashSet<Symbol> = parse_symbols(&symbols).into_iter().collect();
                match self.services.registry.replace(self.connection, &symbols) {
                    Ok(()) => self.snapshot(symbols.iter()),
                    Err(e) => vec![ServerMessage::Error(WsErrorFrame::from(&e))],
                }
            }

            ClientMessage::SwitchPortfolio => self.subscribe_from_portfolio().await,

            ClientMessage::SetCurrency { currency } => {
                let Some(currency) = QuoteCurrency::parse(&currency) else {
                    return vec![ServerMessage::Error(WsErrorFrame::bad_request(format!(
                        "unsupported currency: {currency}"
                    )))];
                };
                // Quotes are cached USD; refuse the switch when no rate
                // exists rather than fabricating 1:1 values later.
                if let Err(e) = self.services.rates.rate(QuoteCurrency::USD, currency) {
                    return vec![ServerMessage::Error(WsErrorFrame::from(&e))];
                }
                self.display_currency = currency;
                let current = self.services.registry.connection_symbols(self.connection);
                self.snapshot(current.iter())
            }

            ClientMessage::Ping => vec![ServerMessage::Pong],
        }
    }
}

fn parse_symbols(raw: &[String]) -> Vec<Symbol> {
    raw.iter()
        .map(|s| Symbol::new(s))
        .filter(|s| !s.is_empty())
        .collect()
}

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Serialize and send one frame. Returns `false` on transport failure.
async fn send_frame(sender: &mut WsSender, frame: &ServerMessage) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize frame: {}", e);
            true
        }
    }
}

/// Handle one WebSocket connection through its whole lifecycle.
pub async fn handle_socket(socket: WebSocket, services: Arc<SessionServices>) {
    let connection = services.next_connection_id();
    services.stats.record_session_opened();
    debug!(connection, state = ?SessionState::Connecting, "Transport established");

    let (mut sender, mut receiver) = socket.split();
    debug!(
        connection,
        state = ?SessionState::Authenticating,
        "Awaiting credential"
    );

    let user = match authenticate(&mut receiver, &services).await {
        Ok(user) => user,
        Err(frame) => {
            let _ = send_frame(&mut sender, &frame).await;
            let _ = sender.close().await;
            services.stats.record_session_closed();
            info!(connection, state = ?SessionState::Closed, "Authentication failed");
            return;
        }
    };

    info!(
        connection,
        user = %user,
        state = ?SessionState::Active,
        "Session authenticated"
    );

    let queue = Arc::new(OutboundQueue::new(QueueConfig::from(&services.settings)));
    services.dispatcher.register(connection, Arc::clone(&queue));

    let mut core = SessionCore::new(connection, user, Arc::clone(&services));

    let mut transport_ok = true;
    for frame in core.subscribe_from_portfolio().await {
        if !send_frame(&mut sender, &frame).await {
            transport_ok = false;
            break;
        }
    }

    let reason = if transport_ok {
        serve(&mut core, &mut sender, &mut receiver, &queue).await
    } else {
        CloseReason::TransportError
    };

    debug!(connection, state = ?SessionState::Draining, ?reason, "Session draining");
    drain(&core, &mut sender, &queue, reason).await;
}

/// Authentication phase: the first frame must carry a valid credential
/// within the auth window. Failure is terminal; there is no retry.
async fn authenticate(
    receiver: &mut WsReceiver,
    services: &Arc<SessionServices>,
) -> Result<UserId, ServerMessage> {
    let first = tokio::time::timeout(services.settings.auth_timeout(), receiver.next()).await;

    let text = match first {
        Err(_) => {
            return Err(ServerMessage::Error(WsErrorFrame::auth_failed(
                "no credential received within the auth window",
            )))
        }
        Ok(None) | Ok(Some(Err(_))) => {
            return Err(ServerMessage::Error(WsErrorFrame::auth_failed(
                "connection closed before authentication",
            )))
        }
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) => {
            return Err(ServerMessage::Error(WsErrorFrame::bad_request(
                "first message must be auth",
            )))
        }
    };

    match serde_json::from_str::<ClientMessage>(&text) {
        Ok(ClientMessage::Auth { credential }) => services
            .validator
            .validate_session(&credential)
            .await
            .map_err(|e| ServerMessage::Error(WsErrorFrame::auth_failed(e.to_string()))),
        Ok(_) => Err(ServerMessage::Error(WsErrorFrame::bad_request(
            "first message must be auth",
        ))),
        Err(e) => Err(ServerMessage::Error(WsErrorFrame::bad_request(format!(
            "unrecognized message: {e}"
        )))),
    }
}

/// Active phase: control frames in, quote frames out, until something ends
/// the session.
async fn serve(
    core: &mut SessionCore,
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
    queue: &Arc<OutboundQueue>,
) -> CloseReason {
    let idle_timeout = core.services.settings.idle_timeout();
    let mut last_activity = Instant::now();

    loop {
        let idle_deadline = last_activity + idle_timeout;

        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_activity = Instant::now();
                    let replies = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => core.handle_control(msg).await,
                        Err(e) => vec![ServerMessage::Error(WsErrorFrame::bad_request(
                            format!("unrecognized message: {e}"),
                        ))],
                    };
                    for reply in replies {
                        if !send_frame(sender, &reply).await {
                            return CloseReason::TransportError;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    // Pong is handled automatically by axum
                    let _ = data;
                    last_activity = Instant::now();
                }
                Some(Ok(Message::Close(_))) | None => return CloseReason::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection = core.connection, "WebSocket error: {}", e);
                    return CloseReason::TransportError;
                }
            },

            result = queue.recv() => match result {
                Ok(quote) => {
                    // Pushed straight off a successful fetch: fresh by construction
                    let frame = core.frame(quote, false);
                    if !send_frame(sender, &frame).await {
                        return CloseReason::TransportError;
                    }
                }
                Err(EngineError::SlowConsumer) => return CloseReason::SlowConsumer,
                Err(_) => return CloseReason::Shutdown,
            },

            _ = tokio::time::sleep_until(idle_deadline) => return CloseReason::Idle,
        }
    }
}

/// Draining phase: flush what is already queued, release the subscription
/// set, close the transport.
async fn drain(
    core: &SessionCore,
    sender: &mut WsSender,
    queue: &Arc<OutboundQueue>,
    reason: CloseReason,
) {
    let services = &core.services;

    if reason == CloseReason::SlowConsumer {
        services.stats.record_slow_consumer();
        warn!(
            connection = core.connection,
            "Disconnecting slow consumer after repeated queue overflow"
        );
    } else {
        let deadline = Instant::now() + services.settings.drain_timeout();
        while let Some(quote) = queue.pop() {
            if Instant::now() >= deadline {
                debug!(
                    connection = core.connection,
                    remaining = queue.len(),
                    "Drain window elapsed with frames left"
                );
                break;
            }
            let frame = core.frame(quote, false);
            if !send_frame(sender, &frame).await {
                break;
            }
        }
    }

    services.registry.unsubscribe_all(core.connection);
    services.dispatcher.unregister(core.connection);
    queue.close();
    let _ = sender.close().await;
    services.stats.record_session_closed();

    info!(
        connection = core.connection,
        state = ?SessionState::Closed,
        ?reason,
        "Session closed"
    );
}
