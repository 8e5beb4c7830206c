//! Settings type definitions.
//!
//! All sections are `camelCase` on the wire and `#[serde(default)]`, so a
//! partial JSON file only overrides what it names.

use std::time::Duration;

use livebridge_logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Broker connection.
    pub broker: BrokerSettings,
    /// Request/reply and deferred call handling.
    pub rpc: RpcSettings,
    /// Live-session monitoring.
    pub session: SessionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BridgeSettings {
    /// Reject values that cannot produce a working bridge.
    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("broker.host is empty".into()));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(SettingsError::InvalidValue("broker.clientId is empty".into()));
        }
        if self.broker.inbound_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.inboundCapacity must be positive".into(),
            ));
        }
        if !self.rpc.domain.starts_with('/') {
            tracing::warn!(domain = %self.rpc.domain, "rpc.domain has no leading slash");
        }
        if self.rpc.max_id_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "rpc.maxIdAttempts must be positive".into(),
            ));
        }
        if self.rpc.deferred_ttl_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "rpc.deferredTtlMs must be positive".into(),
            ));
        }
        if self.session.feed_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "session.feedTimeoutSecs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Broker connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client id.
    pub client_id: String,
    /// Optional username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// CA certificate (PEM) path; TLS is enabled when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Capacity of the inbound envelope queue.
    pub inbound_capacity: usize,
}

impl BrokerSettings {
    /// Keep-alive as a [`Duration`].
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            client_id: "livebridge".to_string(),
            username: None,
            password: None,
            ca_cert_path: None,
            keep_alive_secs: 30,
            reconnect_interval_ms: 5000,
            inbound_capacity: 256,
        }
    }
}

/// Request/reply settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Topic domain prefix.
    pub domain: String,
    /// Timeout for calls without their own timeout, in milliseconds.
    pub default_timeout_ms: u64,
    /// Correlation id regeneration attempts before giving up.
    pub max_id_attempts: u32,
    /// Lifetime of deferred call records, in milliseconds.
    pub deferred_ttl_ms: u64,
    /// Interval of the deferred-record expiry sweep, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl RpcSettings {
    /// Default call timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Deferred record ttl as a [`Duration`].
    pub fn deferred_ttl(&self) -> Duration {
        Duration::from_millis(self.deferred_ttl_ms)
    }

    /// Sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            domain: "/live".to_string(),
            default_timeout_ms: 10_000,
            max_id_attempts: 10,
            deferred_ttl_ms: 60_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Session monitor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// A live session without a feed for this long is considered ended.
    pub feed_timeout_secs: u64,
    /// How often the watchdog checks for a timed-out session, in milliseconds.
    pub watchdog_interval_ms: u64,
}

impl SessionSettings {
    /// Feed timeout as a [`Duration`].
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    /// Watchdog interval as a [`Duration`].
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            feed_timeout_secs: 120,
            watchdog_interval_ms: 1000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn partial_json_keeps_defaults() {
        let s: BridgeSettings =
            serde_json::from_str(r#"{"broker": {"host": "mq.example"}}"#).unwrap();
        assert_eq!(s.broker.host, "mq.example");
        assert_eq!(s.broker.port, 8883);
        assert_eq!(s.rpc.domain, "/live");
    }

    #[test]
    fn camel_case_wire_names() {
        let v = serde_json::to_value(BridgeSettings::default()).unwrap();
        assert_eq!(v["broker"]["reconnectIntervalMs"], 5000);
        assert_eq!(v["rpc"]["maxIdAttempts"], 10);
        assert_eq!(v["session"]["feedTimeoutSecs"], 120);
        assert_eq!(v["logging"]["format"], "compact");
        assert!(v["broker"].get("password").is_none());
    }

    #[test]
    fn durations() {
        let s = BridgeSettings::default();
        assert_eq!(s.rpc.default_timeout(), Duration::from_secs(10));
        assert_eq!(s.rpc.deferred_ttl(), Duration::from_secs(60));
        assert_eq!(s.session.feed_timeout(), Duration::from_secs(120));
        assert_eq!(s.broker.reconnect_interval(), Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_empty_host() {
        let mut s = BridgeSettings::default();
        s.broker.host = "  ".into();
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("host"));
    }

    #[test]
    fn validate_rejects_zero_ttl() {
        let mut s = BridgeSettings::default();
        s.rpc.deferred_ttl_ms = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }
}
