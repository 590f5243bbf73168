//! Per-channel state exposed to consumers: health and latest message per topic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{HealthPayload, HealthStatus, TopicEnvelope};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::cell::CellReader;

type Slot = Option<Arc<TopicEnvelope>>;

/// Latest envelope per topic of one channel.
#[derive(Clone, Default)]
pub struct TopicStore {
    slots: Arc<Mutex<HashMap<String, watch::Sender<Slot>>>>,
}

impl TopicStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `envelope` as the latest on its topic. Untopiced envelopes are dropped.
    pub fn publish(&self, envelope: TopicEnvelope) {
        let Some(topic) = envelope.topic.clone() else {
            trace!("dropping envelope without topic");
            return;
        };
        let mut slots = self.slots.lock();
        let slot = slots.entry(topic).or_insert_with(|| watch::channel(None).0);
        let _ = slot.send_replace(Some(Arc::new(envelope)));
    }

    /// Latest raw envelope on `topic`.
    pub fn latest(&self, topic: &str) -> Option<Arc<TopicEnvelope>> {
        self.slots.lock().get(topic).and_then(|s| s.borrow().clone())
    }

    /// Typed view of `topic`, parsing each envelope's `data` as `T`.
    pub fn topic<T>(&self, topic: &str) -> TopicSubscription<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let rx = self
            .slots
            .lock()
            .entry(topic.to_owned())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        TopicSubscription {
            topic: topic.to_owned(),
            rx,
            pending: true,
            last: None,
            recover: None,
            project: Arc::new(T::clone),
        }
    }
}

impl fmt::Debug for TopicStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut topics: Vec<String> = self.slots.lock().keys().cloned().collect();
        topics.sort();
        f.debug_struct("TopicStore").field("topics", &topics).finish()
    }
}

/// Replacement value on parse failure. Receives the error and the last good
/// value; `None` keeps the last good value.
pub type RecoveryHook<T> = Arc<dyn Fn(&serde_json::Error, Option<&T>) -> Option<T> + Send + Sync>;

/// Consumer view of one topic: last successfully parsed value, projected.
pub struct TopicSubscription<T, U = T> {
    topic: String,
    rx: watch::Receiver<Slot>,
    pending: bool,
    last: Option<T>,
    recover: Option<RecoveryHook<T>>,
    project: Arc<dyn Fn(&T) -> U + Send + Sync>,
}

impl<T, U> TopicSubscription<T, U>
where
    T: DeserializeOwned,
{
    /// Install a parse-failure recovery hook.
    #[must_use]
    pub fn with_recovery<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Error, Option<&T>) -> Option<T> + Send + Sync + 'static,
    {
        self.recover = Some(Arc::new(f));
        self
    }

    /// Expose `f(value)` instead of the parsed value.
    pub fn map<V, F>(self, f: F) -> TopicSubscription<T, V>
    where
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        TopicSubscription {
            topic: self.topic,
            rx: self.rx,
            pending: self.pending,
            last: self.last,
            recover: self.recover,
            project: Arc::new(f),
        }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current projected value, or `None` before the first good message.
    pub fn current(&mut self) -> Option<U> {
        self.refresh();
        self.last.as_ref().map(|value| (self.project)(value))
    }

    /// Wait for the next envelope on this topic. `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        let ok = self.rx.changed().await.is_ok();
        if ok {
            self.pending = true;
        }
        ok
    }

    fn refresh(&mut self) {
        if !self.pending && !self.rx.has_changed().unwrap_or(false) {
            return;
        }
        self.pending = false;
        let Some(envelope) = self.rx.borrow_and_update().clone() else {
            return;
        };
        match serde_json::from_value::<T>(envelope.data.clone()) {
            Ok(value) => self.last = Some(value),
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "failed to parse topic message");
                let recovered = self
                    .recover
                    .as_ref()
                    .and_then(|recover| recover(&e, self.last.as_ref()));
                if let Some(value) = recovered {
                    self.last = Some(value);
                }
            }
        }
    }
}

impl<T, U> fmt::Debug for TopicSubscription<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicSubscription")
            .field("topic", &self.topic)
            .field("has_value", &self.last.is_some())
            .finish_non_exhaustive()
    }
}

/// What consumers see for one active channel.
#[derive(Clone, Debug)]
pub struct ChannelContext {
    channel_id: String,
    topics: Vec<String>,
    health: CellReader<HealthPayload>,
    messages: TopicStore,
}

impl ChannelContext {
    pub(crate) fn new(
        channel_id: String,
        topics: Vec<String>,
        health: CellReader<HealthPayload>,
        messages: TopicStore,
    ) -> Self {
        Self {
            channel_id,
            topics,
            health,
            messages,
        }
    }

    /// Resolved channel id.
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Effective topics.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Subscribable connection health.
    pub fn health(&self) -> CellReader<HealthPayload> {
        self.health.clone()
    }

    /// Current health status.
    pub fn status(&self) -> HealthStatus {
        self.health.get().status
    }

    /// Latest-message store.
    pub fn messages(&self) -> &TopicStore {
        &self.messages
    }

    /// Typed view of one topic.
    pub fn topic<T>(&self, topic: &str) -> TopicSubscription<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.messages.topic(topic)
    }
}
