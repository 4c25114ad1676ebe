//! Configuration for the hub.
//!
//! You can either use defaults or override via environment variables:
//!
//! - `HUB_BIND_ADDR`            (default: "0.0.0.0")
//! - `HUB_PORT`                 (default: "32010")
//! - `HUB_MAX_PEERS`            (default: "1024")
//! - `HUB_HANDSHAKE_TIMEOUT_MS` (default: "10000")
//! - `HUB_SHUTDOWN_GRACE_MS`    (default: "1000")
//! - `HUB_AUTORESET`            (default: "false")

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 32010;

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// TCP port to listen on. 0 picks a free port.
    pub port: u16,

    /// Maximum number of simultaneously live peers. Connections beyond
    /// this are dropped before the handshake.
    pub max_peers: usize,

    /// Bound on greeting + identity + extra handshake.
    pub handshake_timeout: Duration,

    /// How long `shutdown` waits for Disconnect frames to go out before
    /// force-closing what is left.
    pub shutdown_grace: Duration,

    /// Reset every connection's encoder before each frame.
    pub autoreset: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_peers: 1024,
            handshake_timeout: Duration::from_millis(10_000),
            shutdown_grace: Duration::from_millis(1_000),
            autoreset: false,
        }
    }
}

impl Config {
    /// Construct a `Config` from environment variables, falling back
    /// to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Ok(Config {
            bind_addr: lookup("HUB_BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: read_or_default(&lookup, "HUB_PORT", defaults.port)?,
            max_peers: read_or_default(&lookup, "HUB_MAX_PEERS", defaults.max_peers)?,
            handshake_timeout: Duration::from_millis(read_or_default(
                &lookup,
                "HUB_HANDSHAKE_TIMEOUT_MS",
                defaults.handshake_timeout.as_millis() as u64,
            )?),
            shutdown_grace: Duration::from_millis(read_or_default(
                &lookup,
                "HUB_SHUTDOWN_GRACE_MS",
                defaults.shutdown_grace.as_millis() as u64,
            )?),
            autoreset: read_or_default(&lookup, "HUB_AUTORESET", defaults.autoreset)?,
        })
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn read_or_default<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(val) => val.trim().parse::<T>().map_err(|e| ConfigError {
            key,
            value: val,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
