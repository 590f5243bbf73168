//! Health payloads carried by `health` push events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection health as seen by the stream pump.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Acquiring the upstream subscription.
    Connecting,
    /// Upstream subscription is live.
    Connected,
    /// The stream failed; no further messages follow.
    Degraded,
}

impl HealthStatus {
    /// Whether `next` may follow `self` on a single server stream.
    ///
    /// `connecting → connected → (connected | degraded)*`; `connecting` may
    /// also go straight to `degraded` when the upstream cannot be acquired.
    pub fn permits(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Connected | Self::Degraded)
                | (Self::Connected, Self::Connected | Self::Degraded)
        )
    }

    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized body of a `health` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPayload {
    /// `false` only when degraded.
    pub ok: bool,
    /// Current status.
    pub status: HealthStatus,
    /// Emission time, epoch milliseconds on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
    /// Human-readable reason, set on degradation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthPayload {
    /// Build a payload stamped with the current time.
    pub fn new(status: HealthStatus, detail: Option<String>) -> Self {
        Self {
            ok: status != HealthStatus::Degraded,
            status,
            ts: Utc::now(),
            detail,
        }
    }

    /// `connecting` payload.
    pub fn connecting() -> Self {
        Self::new(HealthStatus::Connecting, None)
    }

    /// `connected` payload.
    pub fn connected() -> Self {
        Self::new(HealthStatus::Connected, None)
    }

    /// `degraded` payload with a reason.
    pub fn degraded(detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, Some(detail.into()))
    }
}
