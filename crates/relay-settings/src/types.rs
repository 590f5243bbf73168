//! Settings schema.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! needs to name the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Bus endpoint behavior.
    pub endpoint: EndpointSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Client subscription manager.
    pub client: ClientSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Route the subscription endpoint is mounted on.
    pub path: String,
    /// How long shutdown waits for open streams to drain.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8288,
            path: "/api/realtime".to_string(),
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Bus endpoint settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// Endpoint-wide default for per-message reauthorization. Registry
    /// entries may override it.
    pub reauthorize_on_each_message: bool,
    /// Periodic `health=connected` ticks.
    pub liveness: LivenessSettings,
    /// Push events buffered per stream before the pump waits on the client.
    pub send_queue: usize,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            reauthorize_on_each_message: false,
            liveness: LivenessSettings::default(),
            send_queue: 64,
        }
    }
}

/// Liveness tick settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivenessSettings {
    /// Whether ticks are emitted at all.
    pub enabled: bool,
    /// Tick interval in milliseconds. `0` disables ticks.
    pub interval_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 15_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`RUST_LOG` still wins).
    pub level: String,
    /// JSON lines when `true`, human-readable otherwise.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

/// Client subscription manager settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Reopen a connection after a transport-level failure.
    pub reconnect: bool,
    /// Delay before reopening, in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_delay_ms: 3_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(RelaySettings::default()).unwrap();
        assert!(value["endpoint"].get("reauthorizeOnEachMessage").is_some());
        assert!(value["endpoint"]["liveness"].get("intervalMs").is_some());
        assert!(value["server"].get("shutdownTimeoutMs").is_some());
        assert!(value["client"].get("reconnectDelayMs").is_some());
    }

    #[test]
    fn partial_deserialize_fills_defaults() {
        let settings: RelaySettings =
            serde_json::from_str(r#"{"endpoint": {"liveness": {"enabled": false}}}"#).unwrap();
        assert!(!settings.endpoint.liveness.enabled);
        assert_eq!(settings.endpoint.liveness.interval_ms, 15_000);
        assert_eq!(settings.server, ServerSettings::default());
    }
}
