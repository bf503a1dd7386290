//! Global configuration types for Livedesk.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! waiting-session TTL, the expiry sweep, and channel buffer sizes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Livedesk server.
///
/// Loaded from `~/.livedesk/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Seconds a session may sit in `waiting` without activity before it is
    /// closed as expired. `0` disables expiry.
    #[serde(default = "default_waiting_ttl_secs")]
    pub waiting_ttl_secs: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Outbound queue capacity per connection. Events beyond it are dropped.
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,

    /// Capacity of the coordinator's inbound command queue.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_waiting_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_connection_buffer() -> usize {
    256
}

fn default_command_buffer() -> usize {
    1024
}

impl GlobalConfig {
    /// The waiting TTL, or `None` when expiry is disabled.
    pub fn waiting_ttl(&self) -> Option<Duration> {
        (self.waiting_ttl_secs > 0).then(|| Duration::from_secs(self.waiting_ttl_secs))
    }

    /// Sweep interval, never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            waiting_ttl_secs: default_waiting_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            connection_buffer: default_connection_buffer(),
            command_buffer: default_command_buffer(),
        }
    }
}
