//! Channel identities and the static-or-factory channel spec.
//!
//! A registry entry or a client descriptor names its channel either as a
//! fixed [`ChannelIdentity`] or as a factory that builds one from an optional
//! string parameter (e.g. `user:{id}`). The factory is resolved once per
//! request; nothing is cached between requests.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A concrete channel: its routing name plus the topics published under it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    /// Channel name the client requests (e.g. `"demo"`, `"user:alice"`).
    pub name: String,
    /// Topic names known to the channel.
    pub topics: BTreeSet<String>,
}

impl ChannelIdentity {
    /// Create a channel with no topics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topics: BTreeSet::new(),
        }
    }

    /// Add one topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let _ = self.topics.insert(topic.into());
        self
    }

    /// Add several topics.
    #[must_use]
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Whether `topic` is published on this channel.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// All topic names, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().cloned().collect()
    }
}

/// Builds a channel identity from an optional parameter.
pub type ChannelFactory =
    Arc<dyn Fn(Option<&str>) -> Result<ChannelIdentity, ChannelError> + Send + Sync>;

/// Either a fixed channel or a factory resolved per request.
#[derive(Clone)]
pub enum ChannelSpec {
    /// A channel whose identity never changes.
    Static(ChannelIdentity),
    /// A channel whose identity depends on a parameter.
    Factory(ChannelFactory),
}

impl ChannelSpec {
    /// Wrap a closure as a factory spec.
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(Option<&str>) -> Result<ChannelIdentity, ChannelError> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(f))
    }

    /// Factory producing `"{prefix}:{param}"` with a fixed topic set.
    ///
    /// Resolving without a parameter (or with an empty one) fails with
    /// [`ChannelError::MissingParam`].
    pub fn prefixed<I, S>(prefix: impl Into<String>, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix = prefix.into();
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        Self::factory(move |param| match param {
            Some(p) if !p.is_empty() => Ok(ChannelIdentity {
                name: format!("{prefix}:{p}"),
                topics: topics.clone(),
            }),
            _ => Err(ChannelError::MissingParam),
        })
    }

    /// Resolve to a concrete identity. Static specs ignore `param`.
    pub fn resolve(&self, param: Option<&str>) -> Result<ChannelIdentity, ChannelError> {
        match self {
            Self::Static(identity) => Ok(identity.clone()),
            Self::Factory(factory) => factory(param),
        }
    }

    /// Whether resolution depends on a parameter.
    pub fn is_factory(&self) -> bool {
        matches!(self, Self::Factory(_))
    }
}

impl From<ChannelIdentity> for ChannelSpec {
    fn from(identity: ChannelIdentity) -> Self {
        Self::Static(identity)
    }
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(identity) => f.debug_tuple("Static").field(identity).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Errors raised while resolving a channel spec.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// A factory channel was resolved without its parameter.
    #[error("channel parameter is required")]
    MissingParam,
    /// The parameter was rejected by the factory.
    #[error("invalid channel parameter: {0}")]
    InvalidParam(String),
    /// Any other factory or resolver failure.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> ChannelIdentity {
        ChannelIdentity::new("demo").with_topics(["message", "admin-message"])
    }

    #[test]
    fn static_spec_ignores_param() {
        let spec = ChannelSpec::from(demo());
        assert_eq!(spec.resolve(None).unwrap().name, "demo");
        assert_eq!(spec.resolve(Some("ignored")).unwrap().name, "demo");
        assert!(!spec.is_factory());
    }

    #[test]
    fn topic_names_are_sorted() {
        assert_eq!(demo().topic_names(), vec!["admin-message", "message"]);
    }

    #[test]
    fn prefixed_factory_builds_name() {
        let spec = ChannelSpec::prefixed("user", ["notice"]);
        let resolved = spec.resolve(Some("alice")).unwrap();
        assert_eq!(resolved.name, "user:alice");
        assert!(resolved.has_topic("notice"));
        assert!(spec.is_factory());
    }

    #[test]
    fn prefixed_factory_requires_param() {
        let spec = ChannelSpec::prefixed("user", ["notice"]);
        assert_eq!(spec.resolve(None).unwrap_err(), ChannelError::MissingParam);
        assert_eq!(spec.resolve(Some("")).unwrap_err(), ChannelError::MissingParam);
    }

    #[test]
    fn custom_factory_error_propagates() {
        let spec = ChannelSpec::factory(|_| Err(ChannelError::Other("boom".into())));
        assert_eq!(spec.resolve(Some("x")).unwrap_err().to_string(), "boom");
    }

    #[test]
    fn debug_hides_factory_closure() {
        let spec = ChannelSpec::prefixed("user", ["notice"]);
        assert_eq!(format!("{spec:?}"), "Factory(..)");
    }
}
