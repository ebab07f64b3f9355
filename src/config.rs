//! Configuration Module
//!
//! Handles loading cache and demo settings from environment variables.

use std::env;

/// Runtime configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether tables handed out by a registry emit lifecycle log events
    pub log_events: bool,
    /// Number of keys the demo binary inserts
    pub demo_entries: usize,
    /// TTL in milliseconds for the demo binary's expiring keys
    pub demo_ttl_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_LOG_EVENTS` - Emit add/delete/sweep events (default: false)
    /// - `DEMO_ENTRIES` - Keys inserted by the demo (default: 10000)
    /// - `DEMO_TTL_MS` - Demo TTL in milliseconds (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_events: env::var("CACHE_LOG_EVENTS")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.log_events),
            demo_entries: env::var("DEMO_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.demo_entries),
            demo_ttl_ms: env::var("DEMO_TTL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.demo_ttl_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_events: false,
            demo_entries: 10_000,
            demo_ttl_ms: 2_000,
        }
    }
}

/// Accepts the usual spellings of a boolean switch.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
