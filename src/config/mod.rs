//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::sync::frame::MIN_MAX_FRAME;
use crate::sync::SyncSettings;
use crate::util::time::{tick_delta, DEFAULT_TICK_RATE};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Authoritative simulation ticks per second
    pub tick_rate: u32,
    /// Entities allowed in one session
    pub max_session_entities: usize,
    /// Islands laid out in a new session
    pub island_count: usize,

    /// Core synchronization tunables
    pub sync: SyncSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };
        let server_addr = server_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let tick_rate: u32 = parse_or(&lookup, "TICK_RATE", DEFAULT_TICK_RATE)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }

        let max_session_entities: usize = parse_or(&lookup, "MAX_SESSION_ENTITIES", 16)?;
        if max_session_entities == 0 {
            return Err(ConfigError::Invalid("MAX_SESSION_ENTITIES"));
        }

        let island_count: usize = parse_or(&lookup, "ISLAND_COUNT", 4)?;
        if island_count == 0 {
            return Err(ConfigError::Invalid("ISLAND_COUNT"));
        }

        let mut sync = SyncSettings::default();
        sync.sim.dt = tick_delta(tick_rate);

        sync.max_frame = parse_or(&lookup, "MAX_FRAME_NUM", sync.max_frame)?;
        if sync.max_frame < MIN_MAX_FRAME {
            return Err(ConfigError::Invalid("MAX_FRAME_NUM"));
        }

        sync.tolerance = parse_or(&lookup, "RECONCILE_TOLERANCE", sync.tolerance)?;
        if !sync.tolerance.is_finite() || sync.tolerance < 0.0 {
            return Err(ConfigError::Invalid("RECONCILE_TOLERANCE"));
        }

        let flush_ms: u64 = parse_or(
            &lookup,
            "FLUSH_INTERVAL_MS",
            sync.batcher.flush_interval.as_millis() as u64,
        )?;
        sync.batcher.flush_interval = Duration::from_millis(flush_ms);

        Ok(Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            tick_rate,
            max_session_entities,
            island_count,
            sync,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
