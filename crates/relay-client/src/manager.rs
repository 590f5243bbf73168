//! `SubscriptionManager`: keeps one live connection per desired channel.
//!
//! Consumers hand [`SubscriptionManager::reconcile`] the full list of
//! subscriptions they want. The manager diffs it against the live set by
//! channel id and signature, opening, replacing and closing connections as
//! needed, and then publishes the new channel map in one step.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::connection::{ConnectionOptions, ManagedConnection};
use crate::context::ChannelContext;
use crate::descriptor::{ResolvedSubscription, SubscriptionDescriptor};
use crate::errors::ClientError;
use crate::transport::Transport;

/// Published view: channel id to context.
pub type ChannelMap = Arc<BTreeMap<String, ChannelContext>>;

/// What one reconcile pass changed. Channel ids, sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Newly opened channels.
    pub created: Vec<String>,
    /// Channels whose signature changed and were reopened.
    pub replaced: Vec<String>,
    /// Channels no longer desired.
    pub removed: Vec<String>,
    /// Channels left untouched.
    pub kept: Vec<String>,
}

impl ReconcileReport {
    /// Whether no connection was opened or closed.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.replaced.is_empty() && self.removed.is_empty()
    }
}

/// Owner of every client connection to one endpoint.
pub struct SubscriptionManager {
    endpoint: String,
    transport: Arc<dyn Transport>,
    options: ConnectionOptions,
    connections: HashMap<String, ManagedConnection>,
    published: watch::Sender<ChannelMap>,
}

impl SubscriptionManager {
    /// Manager for `endpoint` (full URL of the bus endpoint).
    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
    ) -> Self {
        let (published, _rx) = watch::channel(ChannelMap::default());
        Self {
            endpoint: endpoint.into(),
            transport,
            options,
            connections: HashMap::new(),
            published,
        }
    }

    /// Bring the live connections in line with `descriptors`.
    ///
    /// Fails without touching any connection when a descriptor cannot be
    /// resolved or two descriptors resolve to the same channel id. Must be
    /// called inside a tokio runtime.
    pub fn reconcile(
        &mut self,
        descriptors: &[SubscriptionDescriptor],
    ) -> Result<ReconcileReport, ClientError> {
        let mut desired: BTreeMap<String, ResolvedSubscription> = BTreeMap::new();
        for descriptor in descriptors {
            let resolved = descriptor.resolve()?;
            let id = resolved.channel_id.clone();
            if desired.insert(id.clone(), resolved).is_some() {
                return Err(ClientError::DuplicateChannel(id));
            }
        }

        let mut report = ReconcileReport::default();

        let stale: Vec<String> = self
            .connections
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(conn) = self.connections.remove(&id) {
                conn.teardown();
            }
            report.removed.push(id);
        }

        for (id, resolved) in desired {
            let signature = resolved.signature(&self.endpoint);
            let replacing = match self.connections.get(&id) {
                Some(conn) if conn.signature() == &signature => {
                    report.kept.push(id);
                    continue;
                }
                Some(_) => true,
                None => false,
            };
            if let Some(old) = self.connections.remove(&id) {
                old.teardown();
            }

            let conn = ManagedConnection::spawn(
                &self.endpoint,
                &resolved,
                self.transport.clone(),
                self.options.clone(),
            );
            let _ = self.connections.insert(id.clone(), conn);
            if replacing {
                report.replaced.push(id);
            } else {
                report.created.push(id);
            }
        }

        report.removed.sort();
        if !report.is_noop() {
            info!(
                created = ?report.created,
                replaced = ?report.replaced,
                removed = ?report.removed,
                kept = report.kept.len(),
                "subscriptions reconciled"
            );
        }
        self.publish();
        Ok(report)
    }

    /// Close every connection and publish an empty map.
    pub fn shutdown(&mut self) {
        debug!(count = self.connections.len(), "closing all subscriptions");
        for (_, conn) in self.connections.drain() {
            conn.teardown();
        }
        self.publish();
    }

    /// Subscribe to the published channel map.
    pub fn channels(&self) -> watch::Receiver<ChannelMap> {
        self.published.subscribe()
    }

    /// Current channel map.
    pub fn snapshot(&self) -> ChannelMap {
        self.published.borrow().clone()
    }

    /// Context of one channel.
    pub fn channel(&self, channel_id: &str) -> Option<ChannelContext> {
        self.connections.get(channel_id).map(|c| c.context().clone())
    }

    /// Endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn publish(&self) {
        let map: BTreeMap<String, ChannelContext> = self
            .connections
            .iter()
            .map(|(id, conn)| (id.clone(), conn.context().clone()))
            .collect();
        let _ = self.published.send_replace(Arc::new(map));
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<&String> = self.connections.keys().collect();
        channels.sort();
        f.debug_struct("SubscriptionManager")
            .field("endpoint", &self.endpoint)
            .field("channels", &channels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use assert_matches::assert_matches;
    use relay_core::{ChannelError, ChannelIdentity, ChannelSpec};

    const ENDPOINT: &str = "http://relay.test/api/realtime";

    fn demo() -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(
            ChannelIdentity::new("demo").with_topics(["message", "admin-message"]),
        )
    }

    fn user(id: &str) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(ChannelSpec::prefixed("user", ["message"])).with_channel_param(id)
    }

    fn manager() -> (SubscriptionManager, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let manager = SubscriptionManager::new(ENDPOINT, transport.clone(), ConnectionOptions::default());
        (manager, transport)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn creates_one_connection_per_channel() {
        let (mut manager, transport) = manager();
        let report = manager.reconcile(&[demo(), user("alice")]).unwrap();
        assert_eq!(report.created, vec!["demo", "user:alice"]);
        assert!(report.replaced.is_empty() && report.removed.is_empty());

        settle().await;
        assert_eq!(transport.opens().len(), 2);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["demo", "user:alice"]);
        assert_eq!(snapshot["demo"].topics(), ["admin-message", "message"]);
    }

    #[tokio::test]
    async fn identical_reconcile_is_noop() {
        let (mut manager, transport) = manager();
        let _ = manager.reconcile(&[demo(), user("alice")]).unwrap();
        settle().await;

        let report = manager.reconcile(&[user("alice"), demo()]).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.kept, vec!["demo", "user:alice"]);
        settle().await;
        assert_eq!(transport.opens().len(), 2);
    }

    #[tokio::test]
    async fn topic_order_does_not_reconnect() {
        let (mut manager, transport) = manager();
        let _ = manager
            .reconcile(&[demo().with_topics(["message", "admin-message"])])
            .unwrap();
        let report = manager
            .reconcile(&[demo().with_topics(["admin-message", "message", "message"])])
            .unwrap();
        assert_eq!(report.kept, vec!["demo"]);
        settle().await;
        assert_eq!(transport.opens().len(), 1);
    }

    #[tokio::test]
    async fn signature_change_replaces_connection() {
        let (mut manager, transport) = manager();
        let _ = manager.reconcile(&[demo()]).unwrap();
        settle().await;
        let first = transport.feed("demo").unwrap();

        let report = manager.reconcile(&[demo().with_topics(["message"])]).unwrap();
        assert_eq!(report.replaced, vec!["demo"]);
        settle().await;

        assert!(first.is_closed());
        let opens = transport.opens();
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[1].topics.as_deref(), Some(&["message".to_owned()][..]));
        assert_eq!(manager.snapshot()["demo"].topics(), ["message"]);
    }

    #[tokio::test]
    async fn params_change_replaces_connection() {
        let (mut manager, _transport) = manager();
        let _ = manager.reconcile(&[demo()]).unwrap();
        let report = manager.reconcile(&[demo().with_param("since", 10_i64)]).unwrap();
        assert_eq!(report.replaced, vec!["demo"]);
    }

    #[tokio::test]
    async fn absent_channel_is_removed() {
        let (mut manager, transport) = manager();
        let _ = manager.reconcile(&[demo(), user("alice")]).unwrap();
        settle().await;
        let alice = transport.feed("user:alice").unwrap();

        let report = manager.reconcile(&[demo()]).unwrap();
        assert_eq!(report.removed, vec!["user:alice"]);
        assert_eq!(report.kept, vec!["demo"]);
        settle().await;

        assert!(alice.is_closed());
        assert!(manager.channel("user:alice").is_none());
        assert!(!manager.snapshot().contains_key("user:alice"));
    }

    #[tokio::test]
    async fn duplicate_channel_rejected_before_opening() {
        let (mut manager, transport) = manager();
        let err = manager
            .reconcile(&[user("alice"), demo(), user("alice")])
            .unwrap_err();
        assert_eq!(err, ClientError::DuplicateChannel("user:alice".into()));
        settle().await;
        assert!(transport.opens().is_empty());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn failed_reconcile_keeps_previous_set() {
        let (mut manager, _transport) = manager();
        let _ = manager.reconcile(&[demo()]).unwrap();
        let err = manager.reconcile(&[demo(), demo()]).unwrap_err();
        assert_matches!(err, ClientError::DuplicateChannel(_));
        assert_eq!(manager.len(), 1);
        assert!(manager.snapshot().contains_key("demo"));
    }

    #[tokio::test]
    async fn unresolvable_descriptor_rejected() {
        let (mut manager, transport) = manager();
        let missing_param = SubscriptionDescriptor::new(ChannelSpec::prefixed("user", ["message"]));
        let err = manager.reconcile(&[demo(), missing_param]).unwrap_err();
        assert_eq!(err, ClientError::Channel(ChannelError::MissingParam));
        settle().await;
        assert!(transport.opens().is_empty());
    }

    #[tokio::test]
    async fn consumers_see_complete_maps() {
        let (mut manager, _transport) = manager();
        let mut rx = manager.channels();
        let _ = manager.reconcile(&[demo(), user("alice"), user("bob")]).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 3);

        let _ = manager.reconcile(&[user("bob")]).unwrap();
        assert_eq!(rx.borrow_and_update().keys().collect::<Vec<_>>(), vec!["user:bob"]);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let (mut manager, transport) = manager();
        let _ = manager.reconcile(&[demo(), user("alice")]).unwrap();
        settle().await;
        let feeds = [transport.feed("demo").unwrap(), transport.feed("user:alice").unwrap()];

        manager.shutdown();
        settle().await;
        assert!(feeds.iter().all(tokio::sync::mpsc::UnboundedSender::is_closed));
        assert!(manager.snapshot().is_empty());
    }

    #[tokio::test]
    async fn drop_closes_everything() {
        let (mut manager, transport) = manager();
        let _ = manager.reconcile(&[demo()]).unwrap();
        settle().await;
        let feed = transport.feed("demo").unwrap();
        drop(manager);
        settle().await;
        assert!(feed.is_closed());
    }
}
