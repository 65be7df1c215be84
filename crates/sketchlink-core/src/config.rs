//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default collaboration server.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
/// Environment variable overriding [`CollabConfig::server_url`].
pub const SERVER_URL_ENV: &str = "SKETCHLINK_SERVER_URL";

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Collaboration client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Base URL of the room server; `/collab/...` paths are resolved against it.
    pub server_url: String,
    /// Push-channel reconnect behavior.
    pub reconnect: ReconnectPolicy,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl CollabConfig {
    /// Defaults, with the server URL taken from `SKETCHLINK_SERVER_URL` if set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                config.server_url = url.trim().to_string();
            }
        }
        config
    }
}

/// Exponential backoff for re-opening a failed push subscription.
///
/// The delay before attempt `n` (zero-based) is `min(max_delay, base_delay * 2^n)`.
/// `max_attempts == 0` disables reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect; transport errors end the session.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Delay before the given zero-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << attempt.min(31));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }
}
