//! Subscription descriptors and their resolved, comparable form.

use relay_core::{ChannelError, ChannelSpec, ParamValue, Params, SubscriptionRequest};
use serde::Serialize;

/// What a consumer wants to be subscribed to.
#[derive(Clone, Debug)]
pub struct SubscriptionDescriptor {
    /// Channel, static or parameterized.
    pub channel: ChannelSpec,
    /// Parameter handed to a factory channel.
    pub channel_param: Option<String>,
    /// Topic subset. `None` subscribes to every topic of the channel.
    pub topics: Option<Vec<String>>,
    /// Extra request params forwarded to the server.
    pub params: Params,
}

impl SubscriptionDescriptor {
    /// Subscribe to all topics of `channel`.
    pub fn new(channel: impl Into<ChannelSpec>) -> Self {
        Self {
            channel: channel.into(),
            channel_param: None,
            topics: None,
            params: Params::new(),
        }
    }

    /// Set the factory parameter.
    #[must_use]
    pub fn with_channel_param(mut self, param: impl Into<String>) -> Self {
        self.channel_param = Some(param.into());
        self
    }

    /// Restrict to a topic subset.
    #[must_use]
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }

    /// Add a request param.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let _ = self.params.insert(key.into(), value.into());
        self
    }

    /// Resolve the channel and normalize topics (sorted, deduplicated).
    pub fn resolve(&self) -> Result<ResolvedSubscription, ChannelError> {
        let identity = self.channel.resolve(self.channel_param.as_deref())?;
        let mut topics = match &self.topics {
            Some(topics) => topics.clone(),
            None => identity.topic_names(),
        };
        topics.sort();
        topics.dedup();
        Ok(ResolvedSubscription {
            channel_id: identity.name,
            topics,
            params: self.params.clone(),
        })
    }
}

/// A descriptor after channel resolution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedSubscription {
    /// Concrete channel name.
    pub channel_id: String,
    /// Sorted, deduplicated topics.
    pub topics: Vec<String>,
    /// Request params.
    pub params: Params,
}

impl ResolvedSubscription {
    /// The POST body for this subscription.
    pub fn request(&self) -> SubscriptionRequest {
        SubscriptionRequest {
            channel: self.channel_id.clone(),
            topics: Some(self.topics.clone()),
            params: self.params.clone(),
        }
    }

    /// Structural fingerprint deciding whether a live connection can be reused.
    pub fn signature(&self, endpoint: &str) -> Signature {
        #[derive(Serialize)]
        struct Parts<'a> {
            endpoint: &'a str,
            #[serde(flatten)]
            subscription: &'a ResolvedSubscription,
        }
        // Params is a BTreeMap, so key order is stable.
        let encoded = serde_json::to_string(&Parts {
            endpoint,
            subscription: self,
        })
        .unwrap_or_else(|_| format!("{endpoint}|{}|{}", self.channel_id, self.topics.join(",")));
        Signature(encoded)
    }
}

/// Opaque, comparable connection signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// The encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ChannelIdentity;

    fn demo() -> ChannelIdentity {
        ChannelIdentity::new("demo").with_topics(["message", "admin-message"])
    }

    #[test]
    fn absent_topics_take_channel_topics() {
        let resolved = SubscriptionDescriptor::new(demo()).resolve().unwrap();
        assert_eq!(resolved.channel_id, "demo");
        assert_eq!(resolved.topics, vec!["admin-message", "message"]);
    }

    #[test]
    fn topics_sorted_and_deduped() {
        let resolved = SubscriptionDescriptor::new(demo())
            .with_topics(["message", "admin-message", "message"])
            .resolve()
            .unwrap();
        assert_eq!(resolved.topics, vec!["admin-message", "message"]);
    }

    #[test]
    fn factory_channel_uses_param() {
        let resolved = SubscriptionDescriptor::new(ChannelSpec::prefixed("user", ["message"]))
            .with_channel_param("alice")
            .resolve()
            .unwrap();
        assert_eq!(resolved.channel_id, "user:alice");
    }

    #[test]
    fn factory_without_param_fails() {
        let err = SubscriptionDescriptor::new(ChannelSpec::prefixed("user", ["message"]))
            .resolve()
            .unwrap_err();
        assert_eq!(err, ChannelError::MissingParam);
    }

    #[test]
    fn topic_order_does_not_change_signature() {
        let a = SubscriptionDescriptor::new(demo())
            .with_topics(["message", "admin-message"])
            .resolve()
            .unwrap();
        let b = SubscriptionDescriptor::new(demo())
            .with_topics(["admin-message", "message"])
            .resolve()
            .unwrap();
        assert_eq!(a.signature("http://x/api"), b.signature("http://x/api"));
    }

    #[test]
    fn signature_covers_endpoint_topics_and_params() {
        let base = SubscriptionDescriptor::new(demo()).with_topics(["message"]);
        let sig = base.resolve().unwrap().signature("http://x/api");

        assert_ne!(sig, base.resolve().unwrap().signature("http://y/api"));
        assert_ne!(
            sig,
            base.clone()
                .with_topics(["admin-message"])
                .resolve()
                .unwrap()
                .signature("http://x/api")
        );
        assert_ne!(
            sig,
            base.clone()
                .with_param("since", 5_i64)
                .resolve()
                .unwrap()
                .signature("http://x/api")
        );
    }

    #[test]
    fn request_carries_explicit_topics() {
        let req = SubscriptionDescriptor::new(demo())
            .with_param("userId", "alice")
            .resolve()
            .unwrap()
            .request();
        assert_eq!(req.channel, "demo");
        assert_eq!(req.topics.clone().unwrap(), vec!["admin-message", "message"]);
        assert_eq!(req.param_str("userId"), Some("alice"));
    }
}
