//! Bridge configuration
//!
//! Loaded from a JSON file, overridden by environment variables, and
//! validated before the supervisor is built.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Endpoint used when no URL (or a blank one) is configured
pub const DEFAULT_URL: &str = "ws://127.0.0.1:6557/socket";

/// Fragment cap for a single logical message
pub const DEFAULT_MAX_FRAGMENTS: usize = 1000;

/// Configuration for the event bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// WebSocket endpoint of the event source
    pub url: String,

    /// Restart the connection automatically after prolonged inactivity
    pub auto_start: bool,

    /// Maximum fragments assembled into one message before it is abandoned
    pub max_fragments: usize,

    /// Minimum seconds between two watchdog start invocations
    pub restart_debounce_secs: u64,

    /// Minimum seconds since the connection was last seen alive before a restart
    pub alive_grace_secs: u64,

    /// Keep envelope fields other than `event`/`time` as opaque status
    pub forward_status: bool,

    /// Timeout for connection establishment in seconds
    pub connect_timeout_secs: u64,

    /// Buffer size of the notification broadcast channel
    pub notification_capacity: usize,

    /// Default log filter for the `bsevent` binary
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            auto_start: false,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            restart_debounce_secs: 15,
            alive_grace_secs: 15,
            forward_status: false,
            connect_timeout_secs: 10,
            notification_capacity: 64,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: BridgeConfig = serde_json::from_str(&json).map_err(|e| {
            BridgeError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), url = %config.url, "Config loaded");
        Ok(config)
    }

    /// Apply `BSEVENT_URL` and `BSEVENT_AUTO_START` overrides
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var("BSEVENT_URL") {
            self.url = url;
        }
        if let Ok(flag) = std::env::var("BSEVENT_AUTO_START") {
            self.auto_start = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
        self
    }

    /// Resolved endpoint; a blank URL falls back to the default
    pub fn endpoint(&self) -> &str {
        if self.url.trim().is_empty() {
            DEFAULT_URL
        } else {
            self.url.trim()
        }
    }

    /// Check the configuration for values the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint();
        if !endpoint.starts_with("ws://") {
            return Err(BridgeError::Config(format!(
                "url must use the ws:// scheme, got '{}'",
                endpoint
            )));
        }
        if self.max_fragments == 0 {
            return Err(BridgeError::Config("maxFragments must be at least 1".to_string()));
        }
        if self.notification_capacity == 0 {
            return Err(BridgeError::Config(
                "notificationCapacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn restart_debounce(&self) -> Duration {
        Duration::from_secs(self.restart_debounce_secs)
    }

    pub fn alive_grace(&self) -> Duration {
        Duration::from_secs(self.alive_grace_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.endpoint(), "ws://127.0.0.1:6557/socket");
        assert_eq!(config.max_fragments, 1000);
        assert_eq!(config.restart_debounce(), Duration::from_secs(15));
        assert_eq!(config.alive_grace(), Duration::from_secs(15));
        assert!(!config.auto_start);
        assert!(!config.forward_status);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_url_falls_back_to_default() {
        let config = BridgeConfig {
            url: "   ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), DEFAULT_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_scheme() {
        let config = BridgeConfig {
            url: "http://127.0.0.1:6557/socket".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_tls_scheme() {
        let config = BridgeConfig {
            url: "wss://127.0.0.1:6557/socket".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_huge_intervals_are_accepted() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"restartDebounceSecs":18446744073709551615,"aliveGraceSecs":18446744073709551615}"#)
                .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.restart_debounce(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_validate_rejects_zero_fragment_cap() {
        let config = BridgeConfig {
            max_fragments: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"url":"ws://10.0.0.2:6557/socket","autoStart":true}"#)
                .unwrap();
        assert_eq!(config.endpoint(), "ws://10.0.0.2:6557/socket");
        assert!(config.auto_start);
        assert_eq!(config.max_fragments, DEFAULT_MAX_FRAGMENTS);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bsevent.json");
        std::fs::write(&path, r#"{"forwardStatus":true,"maxFragments":8}"#).unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert!(config.forward_status);
        assert_eq!(config.max_fragments, 8);
        assert_eq!(config.endpoint(), DEFAULT_URL);
    }

    #[test]
    fn test_from_file_missing() {
        let err = BridgeConfig::from_file("/tmp/nonexistent-bsevent-config.json").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_from_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(BridgeConfig::from_file(&path).is_err());
    }
}
