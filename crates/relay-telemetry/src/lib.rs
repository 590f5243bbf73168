//! # relay-telemetry
//!
//! Installs the process-wide `tracing` subscriber.
//!
//! The filter is built from [`TelemetryConfig`] unless `RUST_LOG` is set, in
//! which case the environment wins. Output is JSON lines by default, or the
//! human-readable `fmt` format for local runs.

#![deny(unsafe_code)]

use relay_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `relay_server` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines when `true`, pretty otherwise.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from the `logging` settings section.
    ///
    /// An unparseable level falls back to `info`.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_level: settings.level.parse().unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json: settings.json,
        }
    }

    /// Add a per-module override.
    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// Filter directive string built from the configured levels.
    pub fn filter_string(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push(',');
            filter.push_str(module);
            filter.push('=');
            filter.push_str(&level.to_string().to_lowercase());
        }
        filter
    }
}

/// Returned by [`init_telemetry`]; keep it alive for the life of the process.
#[derive(Debug)]
pub struct TelemetryGuard {
    filter: String,
    installed: bool,
}

impl TelemetryGuard {
    /// The filter directives in effect.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether this call installed the global subscriber. `false` means one
    /// was already set (common in tests).
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let configured = config.filter_string();
    let (env_filter, filter) = match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            let directives = filter.to_string();
            (filter, directives)
        }
        Err(_) => (EnvFilter::new(&configured), configured),
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok();

    TelemetryGuard { filter, installed }
}
