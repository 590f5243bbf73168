//! Upstream publishing system: the trait the pump consumes and an in-process
//! implementation backed by `tokio::sync::broadcast`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use relay_core::TopicEnvelope;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use crate::errors::UpstreamError;

/// Envelopes in publish order. An `Err` item ends the stream for the pump.
pub type EnvelopeStream = BoxStream<'static, Result<TopicEnvelope, UpstreamError>>;

/// Grants access to one `(channel, topics)` subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    /// Opaque token id.
    pub id: String,
    /// Channel the token was issued for.
    pub channel: String,
    /// Topics the token covers.
    pub topics: Vec<String>,
}

/// The publishing system, as seen by the bridge.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue a token for `channel` restricted to `topics`.
    async fn issue_token(
        &self,
        channel: &str,
        topics: &[String],
    ) -> Result<SubscriptionToken, UpstreamError>;

    /// Open the envelope stream for a token.
    async fn subscribe(&self, token: &SubscriptionToken) -> Result<EnvelopeStream, UpstreamError>;

    /// Release a token. Best effort; callers log and continue on failure.
    async fn cancel(&self, token: &SubscriptionToken) -> Result<(), UpstreamError>;
}

const DEFAULT_CAPACITY: usize = 256;

/// In-process hub with one broadcast channel per channel name.
///
/// Subscribers only see envelopes on their token's topics, plus envelopes
/// with no topic at all (those are passed through so per-message
/// reauthorization can reject them).
pub struct InMemoryUpstream {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<TopicEnvelope>>>,
    tokens: RwLock<HashMap<String, SubscriptionToken>>,
}

impl InMemoryUpstream {
    /// Hub with the default per-channel buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Hub with a custom per-channel buffer. Subscribers that fall further
    /// behind than `capacity` fail with [`UpstreamError::Lagged`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<TopicEnvelope> {
        if let Some(tx) = self.channels.read().get(channel) {
            return tx.clone();
        }
        self.channels
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish on `channel`. Returns how many subscribers received it.
    pub fn publish(&self, channel: &str, envelope: TopicEnvelope) -> usize {
        let tx = self.channels.read().get(channel).cloned();
        match tx {
            Some(tx) => tx.send(envelope).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Number of outstanding tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }
}

impl Default for InMemoryUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for InMemoryUpstream {
    async fn issue_token(
        &self,
        channel: &str,
        topics: &[String],
    ) -> Result<SubscriptionToken, UpstreamError> {
        if topics.is_empty() {
            return Err(UpstreamError::Token("no topics requested".into()));
        }
        let token = SubscriptionToken {
            id: uuid::Uuid::now_v7().to_string(),
            channel: channel.to_string(),
            topics: topics.to_vec(),
        };
        let _ = self.tokens.write().insert(token.id.clone(), token.clone());
        debug!(channel, token = %token.id, "issued subscription token");
        Ok(token)
    }

    async fn subscribe(&self, token: &SubscriptionToken) -> Result<EnvelopeStream, UpstreamError> {
        let registered = self
            .tokens
            .read()
            .get(&token.id)
            .cloned()
            .ok_or_else(|| UpstreamError::UnknownToken(token.id.clone()))?;

        let topics: Arc<BTreeSet<String>> = Arc::new(registered.topics.into_iter().collect());
        let rx = self.sender(&registered.channel).subscribe();

        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let topics = topics.clone();
            async move {
                match item {
                    Ok(envelope) => match envelope.topic() {
                        Some(topic) if !topics.contains(topic) => None,
                        _ => Some(Ok(envelope)),
                    },
                    Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(UpstreamError::Lagged(n))),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn cancel(&self, token: &SubscriptionToken) -> Result<(), UpstreamError> {
        self.tokens
            .write()
            .remove(&token.id)
            .map(|_| ())
            .ok_or_else(|| UpstreamError::UnknownToken(token.id.clone()))
    }
}
