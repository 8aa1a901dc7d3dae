//! pricestreamd - Real-time price distribution server.
//!
//! Polls upstream market-data providers for every symbol with a live
//! subscriber and fans the updates out to connected WebSocket clients.

mod collaborators;
mod config;
mod fx;
mod session;
mod ws_server;

use clap::Parser;
use collaborators::{StaticPortfolioDirectory, StaticSessionValidator};
use config::AppConfig;
use pricestream_core::{now_ms, Provider, Symbol};
use pricestream_engine::{
    ConversionTable, Dispatcher, EngineStats, PriceCache, SubscriptionRegistry,
};
use pricestream_feeds::{
    CoinCapProvider, CoinGeckoProvider, Fetcher, ProviderQuota, QuoteProvider, SymbolSource,
    FETCH_EVENT_BUFFER,
};
use session::SessionServices;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// pricestream server CLI
#[derive(Parser, Debug)]
#[command(name = "pricestreamd")]
#[command(about = "Real-time portfolio price distribution engine", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// WebSocket server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Poll interval override in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Build the provider chain in configured failover order.
fn build_providers(config: &AppConfig) -> Vec<Box<dyn QuoteProvider>> {
    let call_timeout = config.fetcher.call_timeout();
    let mut providers: Vec<Box<dyn QuoteProvider>> = Vec::new();

    for provider_config in config.enabled_providers() {
        let settings = provider_config.provider_settings(call_timeout);
        let built = match provider_config.provider {
            Provider::CoinGecko => {
                CoinGeckoProvider::new(&settings).map(|p| Box::new(p) as Box<dyn QuoteProvider>)
            }
            Provider::CoinCap => {
                CoinCapProvider::new(&settings).map(|p| Box::new(p) as Box<dyn QuoteProvider>)
            }
        };
        match built {
            Ok(provider) => providers.push(provider),
            Err(e) => warn!(provider = %provider_config.provider, "Failed to build provider: {}", e),
        }
    }

    providers
}

/// Static auth wiring from `PRICESTREAM_AUTH_TOKENS` ("credential:user"
/// pairs, comma-separated). A real deployment plugs its session service in
/// behind the `SessionValidator` trait instead.
fn static_auth_from_env() -> StaticSessionValidator {
    let mut validator = StaticSessionValidator::new();
    match std::env::var("PRICESTREAM_AUTH_TOKENS") {
        Ok(pairs) => {
            for pair in pairs.split(',') {
                if let Some((credential, user)) = pair.split_once(':') {
                    validator = validator.with_token(credential.trim(), user.trim());
                }
            }
        }
        Err(_) => {
            warn!("PRICESTREAM_AUTH_TOKENS not set; every connection will be rejected");
        }
    }
    validator
}

/// Default portfolio from `PRICESTREAM_DEFAULT_PORTFOLIO` ("BTC,ETH").
fn portfolios_from_env() -> StaticPortfolioDirectory {
    let default_symbols: Vec<Symbol> = std::env::var("PRICESTREAM_DEFAULT_PORTFOLIO")
        .map(|raw| {
            raw.split(',')
                .map(Symbol::new)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    StaticPortfolioDirectory::new().with_default(default_symbols)
}

/// Periodic sweep removing cache entries nobody watches anymore.
async fn run_eviction_sweeper(
    cache: Arc<PriceCache>,
    registry: Arc<SubscriptionRegistry>,
    interval: Duration,
) {
    info!("Starting cache eviction sweeper");

    loop {
        tokio::time::sleep(interval).await;
        let watched = registry.symbols_with_subscribers();
        cache.evict_unwatched(&watched, now_ms());
    }
}

/// Periodic one-line stats report.
async fn run_stats_reporter(stats: Arc<EngineStats>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let summary = stats.summary();
        info!(
            uptime_secs = summary.uptime_secs,
            quotes = summary.quotes_ingested,
            enqueued = summary.frames_enqueued,
            coalesced = summary.frames_coalesced,
            dropped = summary.frames_dropped,
            sessions = summary.sessions_opened - summary.sessions_closed,
            "Engine stats"
        );
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_logging(&args.log_level);

    info!("pricestream starting...");

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return;
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        config.fetcher.poll_interval_ms = poll_interval_ms;
    }
    config.log_level = args.log_level.clone();

    // API keys ride in via the environment, never the config file
    if let Ok(key) = std::env::var("COINGECKO_API_KEY") {
        for provider in config
            .providers
            .iter_mut()
            .filter(|p| p.provider == Provider::CoinGecko)
        {
            if provider.api_key.is_none() {
                provider.api_key = Some(key.clone());
            }
        }
    }

    info!("  Port: {}", config.server.port);
    info!("  Poll interval: {} ms", config.fetcher.poll_interval_ms);
    info!(
        "  Providers: {}",
        config
            .enabled_providers()
            .iter()
            .map(|p| p.provider.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    // Shared services
    let stats = Arc::new(EngineStats::new());
    let cache = Arc::new(PriceCache::new((&config.cache).into(), Arc::clone(&stats)));
    let registry = Arc::new(SubscriptionRegistry::new((&config.session).into()));
    let rates = Arc::new(ConversionTable::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&cache),
        Arc::clone(&registry),
        Arc::clone(&stats),
    ));

    // Upstream fetcher over the configured provider chain
    let providers = build_providers(&config);
    if providers.is_empty() {
        tracing::error!("No usable providers configured, exiting");
        return;
    }
    let (events_tx, events_rx) = mpsc::channel(FETCH_EVENT_BUFFER);
    let symbol_source: Arc<dyn SymbolSource> = registry.clone();
    let mut fetcher = Fetcher::new(providers, symbol_source, events_tx, (&config.fetcher).into());
    for provider_config in config.enabled_providers() {
        fetcher = fetcher.with_quota(
            provider_config.provider,
            ProviderQuota::new(provider_config.quota_config()),
        );
    }

    // Load FX rates before accepting clients so display-currency switches
    // work from the first frame
    match fx::refresh_rates(&rates).await {
        Ok(count) => info!(pairs = count, "Initial FX rates loaded"),
        Err(e) => warn!("Failed to load initial FX rates: {}", e),
    }

    let services = Arc::new(SessionServices::new(
        Arc::new(static_auth_from_env()),
        Arc::new(portfolios_from_env()),
        Arc::clone(&registry),
        Arc::clone(&cache),
        Arc::clone(&rates),
        Arc::clone(&dispatcher),
        Arc::clone(&stats),
        config.session.clone(),
    ));

    let server_handle = match ws_server::start_server(services, config.server.port).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to start WebSocket server: {}", e);
            return;
        }
    };

    // Background tasks
    let dispatcher_handle = tokio::spawn(Arc::clone(&dispatcher).run(events_rx));
    let fetcher_handle = tokio::spawn(fetcher.run());
    let fx_handle = tokio::spawn(fx::run_fx_updater(
        Arc::clone(&rates),
        Duration::from_millis(config.server.fx_refresh_interval_ms),
    ));
    let sweeper_handle = tokio::spawn(run_eviction_sweeper(
        Arc::clone(&cache),
        Arc::clone(&registry),
        Duration::from_millis(config.cache.eviction_sweep_interval_ms),
    ));
    let stats_handle = tokio::spawn(run_stats_reporter(
        Arc::clone(&stats),
        Duration::from_millis(config.server.stats_interval_ms),
    ));

    info!("Press Ctrl+C to stop...");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");

    warn!("Shutdown signal received");

    for handle in [
        server_handle,
        fetcher_handle,
        dispatcher_handle,
        fx_handle,
        sweeper_handle,
        stats_handle,
    ] {
        handle.abort();
    }

    let summary = stats.summary();
    info!("Final stats:");
    info!("  Uptime: {} seconds", summary.uptime_secs);
    info!("  Quotes ingested: {}", summary.quotes_ingested);
    info!("  Frames delivered: {}", summary.frames_enqueued);
    info!("  Frames coalesced: {}", summary.frames_coalesced);
    info!("  Frames dropped: {}", summary.frames_dropped);
    info!("  Sessions served: {}", summary.sessions_opened);

    info!("pricestream stopped");
}
