//! Application configuration.

use pricestream_core::Provider;
use pricestream_engine::{CacheConfig, QueueConfig, RegistryConfig};
use pricestream_feeds::{BreakerConfig, FetcherConfig, ProviderSettings, QuotaConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider chain, in failover order (first entry is primary).
    pub providers: Vec<ProviderConfig>,
    /// Fetcher configuration.
    pub fetcher: FetcherSettings,
    /// Cache configuration.
    pub cache: CacheSettings,
    /// Session configuration.
    pub session: SessionSettings,
    /// Server configuration.
    pub server: ServerSettings,
    /// Logging level.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig::new(Provider::CoinGecko),
                ProviderConfig::new(Provider::CoinCap),
            ],
            fetcher: FetcherSettings::default(),
            cache: CacheSettings::default(),
            session: SessionSettings::default(),
            server: ServerSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// absent. A present-but-invalid file is a startup error.
    pub fn load(path: &str) -> Result<Self, String> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| format!("invalid config {path}: {e}"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path, "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(format!("failed to read config {path}: {e}")),
        }
    }

    /// Enabled providers in failover order.
    pub fn enabled_providers(&self) -> Vec<&ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }
}

/// Per-provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier.
    pub provider: Provider,
    /// Whether enabled.
    pub enabled: bool,
    /// API key (optional; also read from env in `main`).
    pub api_key: Option<String>,
    /// Base URL override (e.g., the CoinGecko pro endpoint).
    pub base_url: Option<String>,
    /// Maximum symbols per batch call.
    pub max_symbols_per_call: usize,
    /// Calls per window override; `None` uses the provider's published budget.
    pub max_calls_per_window: Option<u32>,
    /// Rolling window length override in milliseconds.
    pub window_ms: Option<u64>,
}

impl ProviderConfig {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            enabled: true,
            api_key: None,
            base_url: None,
            max_symbols_per_call: 50,
            max_calls_per_window: None,
            window_ms: None,
        }
    }

    /// Construction settings for the provider instance.
    pub fn provider_settings(&self, call_timeout: Duration) -> ProviderSettings {
        let mut settings = ProviderSettings::new(self.provider);
        settings.base_url = self.base_url.clone();
        settings.api_key = self.api_key.clone();
        settings.max_symbols_per_call = self.max_symbols_per_call;
        settings.call_timeout = call_timeout;
        settings
    }

    /// Call budget, with config overrides applied over the published default.
    pub fn quota_config(&self) -> QuotaConfig {
        let mut quota = QuotaConfig::for_provider(self.provider);
        if let Some(max_calls) = self.max_calls_per_window {
            quota.max_calls = max_calls;
        }
        if let Some(window_ms) = self.window_ms {
            quota.window_ms = window_ms;
        }
        quota
    }
}

/// Fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherSettings {
    /// Interval between poll ticks in milliseconds.
    pub poll_interval_ms: u64,
    /// Per-call HTTP timeout in milliseconds.
    pub call_timeout_ms: u64,
    /// Consecutive failed ticks before a provider's breaker opens.
    pub breaker_failure_threshold: u32,
    /// Breaker cooldown in milliseconds.
    pub breaker_cooldown_ms: u64,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            call_timeout_ms: 10_000,
            breaker_failure_threshold: 3,
            breaker_cooldown_ms: 60_000,
        }
    }
}

impl FetcherSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl From<&FetcherSettings> for FetcherConfig {
    fn from(settings: &FetcherSettings) -> Self {
        FetcherConfig {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            breaker: BreakerConfig {
                failure_threshold: settings.breaker_failure_threshold,
                cooldown: Duration::from_millis(settings.breaker_cooldown_ms),
            },
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// How long an entry counts as fresh, in milliseconds.
    pub freshness_window_ms: u64,
    /// Grace period before an unwatched entry is evicted, in milliseconds.
    pub eviction_grace_ms: u64,
    /// Interval between eviction sweeps, in milliseconds.
    pub eviction_sweep_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            freshness_window_ms: 60_000,
            eviction_grace_ms: 300_000,
            eviction_sweep_interval_ms: 60_000,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        CacheConfig {
            freshness_window: Duration::from_millis(settings.freshness_window_ms),
            eviction_grace: Duration::from_millis(settings.eviction_grace_ms),
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Idle window with no client activity before the session drains.
    pub idle_timeout_ms: u64,
    /// How long a new connection may take to present its credential.
    pub auth_timeout_ms: u64,
    /// Per-connection symbol cap.
    pub max_subscriptions: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Consecutive full-queue drops before a forced disconnect.
    pub max_consecutive_drops: u32,
    /// Upper bound on the drain-phase flush.
    pub drain_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 60_000,
            auth_timeout_ms: 10_000,
            max_subscriptions: 100,
            queue_capacity: 64,
            max_consecutive_drops: 3,
            drain_timeout_ms: 2_000,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl From<&SessionSettings> for QueueConfig {
    fn from(settings: &SessionSettings) -> Self {
        QueueConfig {
            capacity: settings.queue_capacity,
            max_consecutive_drops: settings.max_consecutive_drops,
        }
    }
}

impl From<&SessionSettings> for RegistryConfig {
    fn from(settings: &SessionSettings) -> Self {
        RegistryConfig {
            max_subscriptions_per_connection: settings.max_subscriptions,
        }
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// WebSocket listen port.
    pub port: u16,
    /// FX rate refresh interval in milliseconds.
    pub fx_refresh_interval_ms: u64,
    /// Stats reporter interval in milliseconds.
    pub stats_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 9001,
            fx_refresh_interval_ms: 300_000,
            stats_interval_ms: 60_000,
        }
    }
}
