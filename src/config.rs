use std::str::FromStr;
use std::time::Duration;

use crate::limits::MAX_WINDOW_MS;

/// Grace windows that drive automatic releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long after the booking starts an arrival may still be confirmed.
    pub confirm_window: Duration,
    /// How long after the booking ends the user has to pay or extend.
    pub payment_window: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            confirm_window: Duration::from_secs(10),
            payment_window: Duration::from_secs(10),
        }
    }
}

/// Process configuration, read from `SLOTD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub slots: u32,
    pub lifecycle: LifecycleConfig,
    pub rate_per_minute: u64,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7433,
            slots: 3,
            lifecycle: LifecycleConfig::default(),
            rate_per_minute: 2,
            max_connections: 256,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key);
        Self {
            bind: get("SLOTD_BIND").unwrap_or(defaults.bind),
            port: parse_or(get("SLOTD_PORT"), "SLOTD_PORT", defaults.port),
            slots: parse_or(get("SLOTD_SLOTS"), "SLOTD_SLOTS", defaults.slots),
            lifecycle: LifecycleConfig {
                confirm_window: parse_window(
                    get("SLOTD_CONFIRM_WINDOW_MS"),
                    "SLOTD_CONFIRM_WINDOW_MS",
                    defaults.lifecycle.confirm_window,
                ),
                payment_window: parse_window(
                    get("SLOTD_PAYMENT_WINDOW_MS"),
                    "SLOTD_PAYMENT_WINDOW_MS",
                    defaults.lifecycle.payment_window,
                ),
            },
            rate_per_minute: parse_or(
                get("SLOTD_RATE_PER_MINUTE"),
                "SLOTD_RATE_PER_MINUTE",
                defaults.rate_per_minute,
            ),
            max_connections: parse_or(
                get("SLOTD_MAX_CONNECTIONS"),
                "SLOTD_MAX_CONNECTIONS",
                defaults.max_connections,
            ),
            metrics_port: get("SLOTD_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(s) => s.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparsable {key}={s:?}, using default");
            default
        }),
    }
}

/// Window in milliseconds, at most `MAX_WINDOW_MS`.
fn parse_window(raw: Option<String>, key: &str, default: Duration) -> Duration {
    let ms = parse_or(raw, key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX));
    if ms > MAX_WINDOW_MS {
        tracing::warn!("{key}={ms} exceeds {MAX_WINDOW_MS} ms, using default");
        return default;
    }
    Duration::from_millis(ms)
}
