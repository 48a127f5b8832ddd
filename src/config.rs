//! # config — Daemon configuration
//!
//! Resolved fresh every time the daemon starts. The controller typically sets
//! `BYBIT_TESTNET` and the credentials right before spawning the process, so
//! nothing here is cached in a static: [`DaemonConfig::from_env`] reads the
//! live environment and the result is passed explicitly into constructors.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

use crate::models::{OrderKind, ScoreRange};
use crate::risk::RiskConfig;

pub const BYBIT_MAINNET_URL: &str = "https://api.bybit.com";
pub const BYBIT_TESTNET_URL: &str = "https://api-testnet.bybit.com";

// ─── Credentials ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Credentials {
    pub api_key:    String,
    pub api_secret: String,
}

impl Credentials {
    /// Non-sensitive form used in every log line and error message.
    pub fn key_prefix(&self) -> String {
        key_prefix(&self.api_key)
    }
}

// Never print the secret, not even in `{:?}`.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.key_prefix())
            .field("api_secret", &"***")
            .finish()
    }
}

/// First 8 characters of a key, followed by an ellipsis.
pub fn key_prefix(key: &str) -> String {
    let prefix: String = key.chars().take(8).collect();
    format!("{prefix}…")
}

// ─── Endpoint Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub testnet:          bool,
    /// Credentials for whichever environment `testnet` selects.
    pub credentials:      Option<Credentials>,
    /// Env names the credentials were looked up under (for diagnostics).
    pub key_env:          &'static str,
    pub secret_env:       &'static str,
    /// Market data is always production.
    pub public_base_url:  String,
    pub private_base_url: String,
    pub request_timeout:  Duration,
    pub recv_window_ms:   u64,
}

// ─── Trading Parameters ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Quote-currency notional per order.
    pub trade_size_limit: Decimal,
    /// Stop distance = ATR × multiplier.
    pub atr_multiplier:   Decimal,
    pub atr_period:       usize,
    /// Bybit kline interval, e.g. `"60"`.
    pub atr_interval:     String,
    pub order_kind:       OrderKind,
    pub score_range:      ScoreRange,
    /// Budget for one whole BUY/SELL (market data + order), so a slow
    /// exchange cannot hold the heartbeat past the staleness window.
    pub entry_timeout:    Duration,
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub base_dir:      PathBuf,
    pub tick_interval: Duration,
    pub sync_interval: Duration,
    pub endpoints:     EndpointConfig,
    pub trading:       TradingConfig,
    pub risk:          RiskConfig,
}

impl DaemonConfig {
    /// Read the live process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let testnet = match get("BYBIT_TESTNET") {
            None => false,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "BYBIT_TESTNET not recognised — using production");
                false
            }),
        };

        let (key_env, secret_env) = if testnet {
            ("BYBIT_TESTNET_API_KEY", "BYBIT_TESTNET_API_SECRET")
        } else {
            ("BYBIT_API_KEY", "BYBIT_API_SECRET")
        };
        let credentials = match (get(key_env), get(secret_env)) {
            (Some(api_key), Some(api_secret)) => Some(Credentials { api_key, api_secret }),
            _ => None,
        };

        let endpoints = EndpointConfig {
            testnet,
            credentials,
            key_env,
            secret_env,
            public_base_url:  BYBIT_MAINNET_URL.to_string(),
            private_base_url: if testnet { BYBIT_TESTNET_URL } else { BYBIT_MAINNET_URL }.to_string(),
            request_timeout:  Duration::from_secs(parse_or(&get, "EXCHANGE_TIMEOUT_SECS", 10)),
            recv_window_ms:   parse_or(&get, "BYBIT_RECV_WINDOW_MS", 5000),
        };

        let order_kind = match get("ORDER_TYPE").map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("market") => OrderKind::Market,
            Some("limit") => OrderKind::Limit,
            Some(other) => {
                warn!(value = %other, "ORDER_TYPE not recognised — using market");
                OrderKind::Market
            }
        };

        let score_range = match get("SCORE_RANGE") {
            None => ScoreRange::Signed,
            Some(raw) => ScoreRange::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "SCORE_RANGE not recognised — using signed [-1,1]");
                ScoreRange::Signed
            }),
        };

        let trading = TradingConfig {
            trade_size_limit: parse_or(&get, "RISK_LIMIT_AMOUNT", Decimal::new(100, 0)),
            atr_multiplier:   parse_or(&get, "ATR_MULTIPLIER", Decimal::new(2, 0)),
            atr_period:       parse_or(&get, "ATR_PERIOD", 7),
            atr_interval:     get("ATR_INTERVAL").unwrap_or_else(|| "60".to_string()),
            order_kind,
            score_range,
            entry_timeout:    Duration::from_millis(parse_or(&get, "ENTRY_TIMEOUT_MS", 12_000).max(1)),
        };

        let defaults = RiskConfig::default();
        let risk = RiskConfig {
            max_positions_per_side: parse_or(&get, "RISK_MAX_POSITIONS_PER_SIDE", defaults.max_positions_per_side),
            cooldown: chrono::Duration::seconds(
                parse_or(&get, "RISK_COOLDOWN_SECS", defaults.cooldown.num_seconds()),
            ),
            reversal_window: chrono::Duration::seconds(
                parse_or(&get, "RISK_REVERSAL_WINDOW_SECS", defaults.reversal_window.num_seconds()),
            ),
        };

        // tokio's interval panics on a zero period
        let tick_ms: u64 = parse_or(&get, "DAEMON_TICK_MS", 1000);
        let tick_ms = if tick_ms == 0 {
            warn!(key = "DAEMON_TICK_MS", "Zero tick interval — using 1ms");
            1
        } else {
            tick_ms
        };

        Self {
            base_dir:      get("DAEMON_BASE_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            tick_interval: Duration::from_millis(tick_ms),
            sync_interval: Duration::from_secs(parse_or(&get, "POSITION_SYNC_SECS", 5)),
            endpoints,
            trading,
            risk,
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Boolean-like env spellings. `None` for anything unrecognised.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t"       => Some(true),
        "0" | "false" | "no" | "off" | "n" | "f" | "" => Some(false),
        _ => None,
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparseable config value — using default");
            default
        }),
    }
}
