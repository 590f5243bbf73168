//! Runtime configuration for the server and bus endpoint.

use std::time::Duration;

use relay_settings::RelaySettings;

/// HTTP listener configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// How long shutdown waits for open streams.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Liveness tick configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Whether ticks are emitted.
    pub enabled: bool,
    /// Tick period.
    pub interval: Duration,
}

impl LivenessConfig {
    /// Ticks disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            interval: Duration::ZERO,
        }
    }

    /// Ticks every `interval`.
    pub fn every(interval: Duration) -> Self {
        Self {
            enabled: true,
            interval,
        }
    }

    /// The tick period, or `None` when ticks are suppressed.
    pub fn effective_interval(&self) -> Option<Duration> {
        (self.enabled && !self.interval.is_zero()).then_some(self.interval)
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::every(Duration::from_secs(15))
    }
}

/// Bus endpoint configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Route the endpoint is mounted on.
    pub path: String,
    /// Default for entries that do not set their own reauthorization flag.
    pub reauthorize_on_each_message: bool,
    /// Liveness ticks.
    pub liveness: LivenessConfig,
    /// Push events buffered per stream.
    pub send_queue: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            path: "/api/realtime".into(),
            reauthorize_on_each_message: false,
            liveness: LivenessConfig::default(),
            send_queue: 64,
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
        }
    }
}

impl From<&RelaySettings> for EndpointConfig {
    fn from(settings: &RelaySettings) -> Self {
        let endpoint = &settings.endpoint;
        Self {
            path: settings.server.path.clone(),
            reauthorize_on_each_message: endpoint.reauthorize_on_each_message,
            liveness: LivenessConfig {
                enabled: endpoint.liveness.enabled,
                interval: Duration::from_millis(endpoint.liveness.interval_ms),
            },
            send_queue: endpoint.send_queue.max(1),
        }
    }
}
