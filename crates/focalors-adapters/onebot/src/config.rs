//! Connection settings for the OneBot backend.
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! url = "ws://127.0.0.1:8080"
//! access_token = "secret"
//! api_timeout_secs = 30
//!
//! [backend.reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 60000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// OneBot WebSocket client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneBotConfig {
    /// WebSocket endpoint of the OneBot implementation.
    pub url: String,

    /// Sent as `Authorization: Bearer <token>` when set.
    pub access_token: Option<String>,

    /// How long a single action may take.
    pub api_timeout_secs: u64,

    /// Upper bound on connecting and logging in at startup.
    pub startup_timeout_secs: u64,

    /// Pause between connection and login attempts during startup.
    pub startup_poll_interval_ms: u64,

    pub reconnect: ReconnectConfig,
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            access_token: None,
            api_timeout_secs: 30,
            startup_timeout_secs: 60,
            startup_poll_interval_ms: 1000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl OneBotConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_interval_ms)
    }

    /// Returns the token, treating an empty string as unset.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Reconnection policy once the connection is established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,

    /// Give up after this many failed attempts (None = never).
    pub max_retries: Option<u32>,

    pub initial_delay_ms: u64,

    pub max_delay_ms: u64,

    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Returns the delay that follows `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(current.as_secs_f64() * self.backoff_multiplier),
            self.max_delay(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_config() {
        let config: OneBotConfig =
            serde_json::from_str(r#"{"url":"ws://wechat:8080","access_token":""}"#).unwrap();
        assert_eq!(config.url, "ws://wechat:8080");
        assert_eq!(config.access_token(), None);
        assert_eq!(config.api_timeout(), Duration::from_secs(30));
        assert_eq!(config.startup_timeout(), Duration::from_secs(60));
        assert!(config.reconnect.enabled);
    }

    #[test]
    fn test_backoff_is_capped() {
        let reconnect = ReconnectConfig {
            max_delay_ms: 5000,
            ..Default::default()
        };
        let mut delay = reconnect.initial_delay();
        delay = reconnect.next_delay(delay);
        assert_eq!(delay, Duration::from_secs(2));
        delay = reconnect.next_delay(reconnect.next_delay(delay));
        assert_eq!(delay, Duration::from_secs(5));
    }
}
