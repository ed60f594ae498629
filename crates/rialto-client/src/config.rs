//! Client configuration loaded from environment variables.
//!
//! All settings have defaults matching the product's fixed tuning, so a
//! client starts with zero configuration.

use std::time::Duration;

use rialto_shared::constants::{
    HEARTBEAT_INTERVAL_SECS, PRESENCE_WINDOW_SECS, RING_TIMEOUT_SECS,
};

/// Communication core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Staleness threshold for the online flag.
    /// Env: `RIALTO_PRESENCE_WINDOW_SECS`
    /// Default: `300`
    pub presence_window: Duration,

    /// Cadence of the presence heartbeat task.
    /// Env: `RIALTO_HEARTBEAT_SECS`
    /// Default: `120`
    pub heartbeat_interval: Duration,

    /// How long an outgoing call rings before it is given up as missed.
    /// Env: `RIALTO_RING_TIMEOUT_SECS`
    /// Default: `45`
    pub ring_timeout: Duration,

    /// Whether the notification dispatcher requests external pushes.
    /// Env: `RIALTO_PUSH_ENABLED` (true/false)
    /// Default: `true`
    pub push_enabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            presence_window: Duration::from_secs(PRESENCE_WINDOW_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            ring_timeout: Duration::from_secs(RING_TIMEOUT_SECS),
            push_enabled: true,
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = read_secs("RIALTO_PRESENCE_WINDOW_SECS") {
            config.presence_window = secs;
        }
        if let Some(secs) = read_secs("RIALTO_HEARTBEAT_SECS") {
            config.heartbeat_interval = secs;
        }
        if let Some(secs) = read_secs("RIALTO_RING_TIMEOUT_SECS") {
            config.ring_timeout = secs;
        }
        if let Ok(val) = std::env::var("RIALTO_PUSH_ENABLED") {
            config.push_enabled = val != "false" && val != "0";
        }

        config
    }
}

fn read_secs(var: &str) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            tracing::warn!(var, value = %raw, "Invalid duration, using default");
            None
        }
    }
}
