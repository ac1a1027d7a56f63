//! Configuration for the signaling relay

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for the signaling relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bind address for the WebSocket listener
    pub bind_address: String,

    /// Listener port (0 picks an ephemeral port)
    pub port: u16,

    /// Session time-to-live in seconds; the sweep destroys older sessions
    pub session_ttl_secs: u64,

    /// Interval between expiry sweeps in seconds
    pub sweep_interval_secs: u64,

    /// Window within which identical commit input events collapse, in ms
    pub dedupe_window_ms: u64,

    /// Length of generated session identifiers
    pub session_id_length: usize,

    /// Maximum number of concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9030,
            session_ttl_secs: 1800,
            sweep_interval_secs: 300,
            dedupe_window_ms: 500,
            session_id_length: 8,
            max_sessions: 0,
        }
    }
}

impl RelayConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the bind address is empty, the TTL or
    /// sweep interval is zero, the dedupe window is zero, or the session
    /// id length is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.is_empty() {
            return Err(Error::InvalidConfig("bind_address is empty".to_string()));
        }

        if self.session_ttl_secs == 0 {
            return Err(Error::InvalidConfig(
                "session_ttl_secs must be greater than zero".to_string(),
            ));
        }

        if self.sweep_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.dedupe_window_ms == 0 {
            return Err(Error::InvalidConfig(
                "dedupe_window_ms must be greater than zero".to_string(),
            ));
        }

        if self.session_id_length < 4 || self.session_id_length > 64 {
            return Err(Error::InvalidConfig(format!(
                "session_id_length must be in range 4-64, got {}",
                self.session_id_length
            )));
        }

        Ok(())
    }

    /// Session TTL as a [`Duration`]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Sweep interval as a [`Duration`]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Dedupe window as a [`Duration`]
    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dedupe_window(), Duration::from_millis(500));
        assert_eq!(config.session_ttl(), Duration::from_secs(1800));
    }

    #[test]
    fn test_empty_bind_address_rejected() {
        let config = RelayConfig {
            bind_address: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config = RelayConfig {
            session_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_id_length_bounds() {
        let too_short = RelayConfig {
            session_id_length: 3,
            ..Default::default()
        };
        assert!(too_short.validate().is_err());

        let too_long = RelayConfig {
            session_id_length: 65,
            ..Default::default()
        };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = RelayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RelayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port, config.port);
        assert_eq!(parsed.dedupe_window_ms, config.dedupe_window_ms);
    }
}
