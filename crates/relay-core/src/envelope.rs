//! Topic envelopes as delivered by the upstream publisher.
//!
//! The bridge treats envelopes as opaque. Everything except `topic` and
//! `data` round-trips through `extra` untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A published message record.
///
/// Only `topic` and `data` are read by the bridge. Metadata such as `runId`,
/// `createdAt`, `kind`, `envId` and `fnId` stays in `extra` exactly as the
/// upstream sent it, explicit `null`s included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicEnvelope {
    /// Topic the message was published on. Missing topics fail reauthorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Message body.
    #[serde(default)]
    pub data: Value,
    /// Every other field, passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TopicEnvelope {
    /// Envelope with a topic and body and no metadata.
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: Some(topic.into()),
            data,
            extra: Map::new(),
        }
    }

    /// Envelope with no topic field.
    pub fn untopiced(data: Value) -> Self {
        Self {
            topic: None,
            data,
            extra: Map::new(),
        }
    }

    /// Set the `runId` metadata field.
    #[must_use]
    pub fn with_run_id(self, run_id: impl Into<String>) -> Self {
        self.with_meta("runId", Value::String(run_id.into()))
    }

    /// Set the `createdAt` metadata field.
    #[must_use]
    pub fn with_created_at(self, created_at: Value) -> Self {
        self.with_meta("createdAt", created_at)
    }

    /// Set an arbitrary metadata field.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.extra.insert(key.into(), value);
        self
    }

    /// Topic name, if present.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// `runId`, when the upstream sent it as a string.
    pub fn run_id(&self) -> Option<&str> {
        self.extra.get("runId").and_then(Value::as_str)
    }
}
