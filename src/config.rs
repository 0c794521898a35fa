//! # Control-plane configuration.
//!
//! Provides [`Config`], the centralized settings for liveness timing, event delivery
//! and the TCP transport.
//!
//! Config can be built three ways:
//! 1. **Defaults**: `Config::default()`
//! 2. **YAML file**: `Config::load(path)` (durations as whole seconds, missing keys keep defaults)
//! 3. **Environment**: `Config::with_env_overrides()` applies `SWITCHBOARD_*` variables on top
//!
//! ## Sentinel values
//! - `sweep_interval = 0s` → clamped to 1s (a zero ticker would spin)
//! - `sweep_interval`, `reconnect_grace` above [`MAX_PERIOD`] → clamped to it
//! - `reconnect_grace = 0s` → the node is treated as unreachable on the next reaper pass
//! - `bus_capacity = 0` → clamped to 1 by the bus

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const ENV_PREFIX: &str = "SWITCHBOARD_";

/// Longest sweep interval or reconnection grace; larger values are clamped to it.
pub const MAX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Global configuration for the control plane.
///
/// ## Field semantics
/// - `offline_timeout`: silence after which an unbound node is forced offline by the sweep
/// - `reconnect_grace`: delay between a disconnect and treating the node as unreachable
/// - `sweep_interval`: period of the liveness sweep
/// - `heartbeat_interval_hint`: advisory interval sent to nodes in acknowledgements
/// - `bus_capacity`: event bus ring buffer size
/// - `transport_queue_capacity`: per-connection outbound frame queue
/// - `listen_addr`: TCP listen address used by the daemon
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub offline_timeout: Duration,
    pub reconnect_grace: Duration,
    pub sweep_interval: Duration,
    pub heartbeat_interval_hint: Duration,
    pub bus_capacity: usize,
    pub transport_queue_capacity: usize,
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Loads configuration from a YAML file. Absent keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        Ok(raw.apply(Self::default()))
    }

    /// Applies `SWITCHBOARD_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(std::env::vars())
    }

    /// Applies `SWITCHBOARD_*` overrides from the given key/value pairs.
    ///
    /// Recognized keys: `OFFLINE_TIMEOUT_SECS`, `RECONNECT_GRACE_SECS`,
    /// `SWEEP_INTERVAL_SECS`, `HEARTBEAT_INTERVAL_SECS`, `BUS_CAPACITY`,
    /// `TRANSPORT_QUEUE_CAPACITY`, `LISTEN_ADDR`. Unknown keys are ignored.
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "OFFLINE_TIMEOUT_SECS" => self.offline_timeout = secs(key.as_ref(), value)?,
                "RECONNECT_GRACE_SECS" => self.reconnect_grace = secs(key.as_ref(), value)?,
                "SWEEP_INTERVAL_SECS" => self.sweep_interval = secs(key.as_ref(), value)?,
                "HEARTBEAT_INTERVAL_SECS" => {
                    self.heartbeat_interval_hint = secs(key.as_ref(), value)?
                }
                "BUS_CAPACITY" => self.bus_capacity = parse(key.as_ref(), value)?,
                "TRANSPORT_QUEUE_CAPACITY" => {
                    self.transport_queue_capacity = parse(key.as_ref(), value)?
                }
                "LISTEN_ADDR" => self.listen_addr = parse(key.as_ref(), value)?,
                _ => {}
            }
        }
        Ok(self)
    }

    /// Returns the sweep period clamped to `1s..=MAX_PERIOD`.
    #[inline]
    pub fn sweep_interval_clamped(&self) -> Duration {
        self.sweep_interval.clamp(Duration::from_secs(1), MAX_PERIOD)
    }

    /// Returns the reconnection grace clamped to at most [`MAX_PERIOD`].
    #[inline]
    pub fn reconnect_grace_clamped(&self) -> Duration {
        self.reconnect_grace.min(MAX_PERIOD)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns a transport queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn transport_queue_clamped(&self) -> usize {
        self.transport_queue_capacity.max(1)
    }

    /// Offline timeout as a `chrono` duration, for comparisons against `last_seen`.
    #[inline]
    pub fn offline_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.offline_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `offline_timeout = 300s`
    /// - `reconnect_grace = 5s`
    /// - `sweep_interval = 30s`
    /// - `heartbeat_interval_hint = 30s`
    /// - `bus_capacity = 1024`
    /// - `transport_queue_capacity = 64`
    /// - `listen_addr = 0.0.0.0:7400`
    fn default() -> Self {
        Self {
            offline_timeout: Duration::from_secs(300),
            reconnect_grace: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            heartbeat_interval_hint: Duration::from_secs(30),
            bus_capacity: 1024,
            transport_queue_capacity: 64,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7400)),
        }
    }
}

/// On-disk shape: every key optional, durations as whole seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    offline_timeout_secs: Option<u64>,
    reconnect_grace_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    bus_capacity: Option<usize>,
    transport_queue_capacity: Option<usize>,
    listen_addr: Option<SocketAddr>,
}

impl RawConfig {
    fn apply(self, mut cfg: Config) -> Config {
        if let Some(s) = self.offline_timeout_secs {
            cfg.offline_timeout = Duration::from_secs(s);
        }
        if let Some(s) = self.reconnect_grace_secs {
            cfg.reconnect_grace = Duration::from_secs(s);
        }
        if let Some(s) = self.sweep_interval_secs {
            cfg.sweep_interval = Duration::from_secs(s);
        }
        if let Some(s) = self.heartbeat_interval_secs {
            cfg.heartbeat_interval_hint = Duration::from_secs(s);
        }
        if let Some(n) = self.bus_capacity {
            cfg.bus_capacity = n;
        }
        if let Some(n) = self.transport_queue_capacity {
            cfg.transport_queue_capacity = n;
        }
        if let Some(addr) = self.listen_addr {
            cfg.listen_addr = addr;
        }
        cfg
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, value).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_overrides_only_present_keys() {
        let cfg = Config::from_yaml("offline_timeout_secs: 120\nbus_capacity: 16\n").unwrap();
        assert_eq!(cfg.offline_timeout, Duration::from_secs(120));
        assert_eq!(cfg.bus_capacity, 16);
        assert_eq!(cfg.reconnect_grace, Duration::from_secs(5));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_yaml_rejects_unknown_keys() {
        let err = Config::from_yaml("offline_timeout: 5\n").unwrap_err();
        assert_eq!(err.as_label(), "config_parse");
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::default()
            .with_overrides([
                ("SWITCHBOARD_RECONNECT_GRACE_SECS", "9"),
                ("SWITCHBOARD_LISTEN_ADDR", "127.0.0.1:9000"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();
        assert_eq!(cfg.reconnect_grace, Duration::from_secs(9));
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let err = Config::default()
            .with_overrides([("SWITCHBOARD_SWEEP_INTERVAL_SECS", "soon")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_clamps() {
        let cfg = Config {
            sweep_interval: Duration::ZERO,
            bus_capacity: 0,
            transport_queue_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.sweep_interval_clamped(), Duration::from_secs(1));
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.transport_queue_clamped(), 1);
    }

    #[test]
    fn test_huge_periods_are_clamped() {
        let cfg = Config::default()
            .with_overrides([
                ("SWITCHBOARD_RECONNECT_GRACE_SECS", u64::MAX.to_string()),
                ("SWITCHBOARD_SWEEP_INTERVAL_SECS", u64::MAX.to_string()),
            ])
            .unwrap();
        assert_eq!(cfg.reconnect_grace_clamped(), MAX_PERIOD);
        assert_eq!(cfg.sweep_interval_clamped(), MAX_PERIOD);
        assert!(tokio::time::Instant::now()
            .checked_add(cfg.reconnect_grace_clamped())
            .is_some());
    }
}
