//! Failure stages and the structured context handed to the failure resolver.

use serde::{Deserialize, Serialize};

/// Where in the request/stream lifecycle a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStage {
    /// Malformed request body.
    RequestValidation,
    /// Channel routing or registry configuration.
    ChannelResolution,
    /// Requested topics unknown to the channel.
    TopicValidation,
    /// Initial authorization denied or errored.
    Authorization,
    /// Per-message reauthorization denied or errored.
    Reauthorization,
    /// Upstream or transport failure while streaming.
    Stream,
}

impl FailureStage {
    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestValidation => "request-validation",
            Self::ChannelResolution => "channel-resolution",
            Self::TopicValidation => "topic-validation",
            Self::Authorization => "authorization",
            Self::Reauthorization => "reauthorization",
            Self::Stream => "stream",
        }
    }

    /// Whether failures at this stage surface as `health.detail` rather than
    /// a JSON error body.
    pub fn is_stream_time(self) -> bool {
        matches!(self, Self::Reauthorization | Self::Stream)
    }
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a failure at the point it is raised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureContext {
    /// Lifecycle stage.
    pub stage: FailureStage,
    /// Message used when no override applies.
    pub message: String,
    /// HTTP-equivalent status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Channel involved, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Topics involved (invalid, denied, or the offending message topic).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    /// Registry keys involved (ambiguous matches, failing entry).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub registry_keys: Vec<String>,
    /// Underlying error text, if a callback or collaborator raised one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl FailureContext {
    /// New context with a default message.
    pub fn new(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            status: None,
            channel: None,
            topics: Vec::new(),
            registry_keys: Vec::new(),
            cause: None,
        }
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the channel.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set the topics.
    #[must_use]
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Set the registry keys.
    #[must_use]
    pub fn with_registry_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wire_names() {
        let value = serde_json::to_value(FailureStage::ChannelResolution).unwrap();
        assert_eq!(value, "channel-resolution");
        assert_eq!(FailureStage::TopicValidation.to_string(), "topic-validation");
    }

    #[test]
    fn stream_time_stages() {
        assert!(FailureStage::Reauthorization.is_stream_time());
        assert!(FailureStage::Stream.is_stream_time());
        assert!(!FailureStage::Authorization.is_stream_time());
        assert!(!FailureStage::RequestValidation.is_stream_time());
    }

    #[test]
    fn context_serialization_skips_empty() {
        let ctx = FailureContext::new(FailureStage::Authorization, "Forbidden").with_status(403);
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["stage"], "authorization");
        assert_eq!(value["status"], 403);
        assert!(value.get("topics").is_none());
        assert!(value.get("registryKeys").is_none());
    }

    #[test]
    fn builder_sets_metadata() {
        let ctx = FailureContext::new(FailureStage::ChannelResolution, "ambiguous")
            .with_channel("demo")
            .with_registry_keys(["a", "b"])
            .with_cause("two matches");
        assert_eq!(ctx.channel.as_deref(), Some("demo"));
        assert_eq!(ctx.registry_keys, vec!["a", "b"]);
        assert_eq!(ctx.cause.as_deref(), Some("two matches"));
    }
}
