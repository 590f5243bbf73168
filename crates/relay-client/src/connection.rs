//! One live subscription stream on the client side.
//!
//! A spawned task opens the stream through the [`Transport`], feeds `health`
//! events into the channel's health cell and `message` events into its topic
//! store, and reconnects after transport-level failures unless the server
//! rejected the request with a 4xx.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use relay_core::{HEALTH_EVENT, HealthPayload, HealthStatus, MESSAGE_EVENT, SubscriptionRequest, TopicEnvelope};
use relay_settings::ClientSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cell::ObservableCell;
use crate::context::{ChannelContext, TopicStore};
use crate::descriptor::{ResolvedSubscription, Signature};
use crate::errors::TransportError;
use crate::sse::SseEvent;
use crate::transport::Transport;

/// Detail used when the server closes a stream without saying why.
pub const CONNECTION_CLOSED: &str = "Connection closed";

/// A failure surfaced to the consumer's callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionFailure {
    /// Channel the connection serves.
    pub channel_id: String,
    /// Failure message.
    pub message: String,
    /// HTTP status, when the server rejected the request.
    pub status: Option<u16>,
    /// Reason phrase for `status`.
    pub status_text: Option<String>,
}

impl ConnectionFailure {
    fn new(channel_id: &str, message: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.to_owned(),
            message: message.into(),
            status: None,
            status_text: None,
        }
    }

    fn from_transport(channel_id: &str, err: &TransportError) -> Self {
        match err {
            TransportError::Status {
                status,
                status_text,
                message,
            } => Self {
                channel_id: channel_id.to_owned(),
                message: message.clone(),
                status: Some(*status),
                status_text: Some(status_text.clone()),
            },
            other => Self::new(channel_id, other.to_string()),
        }
    }

    /// `message|status|status_text`; equal fingerprints are reported once.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.message,
            self.status.map(|s| s.to_string()).unwrap_or_default(),
            self.status_text.as_deref().unwrap_or_default()
        )
    }
}

/// Failure callback.
pub type FailureCallback = Arc<dyn Fn(&ConnectionFailure) + Send + Sync>;

/// Per-connection behavior shared by every connection of a manager.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Reopen after transport-level failures.
    pub reconnect: bool,
    /// Wait between attempts.
    pub reconnect_delay: Duration,
    /// Called once per distinct failure.
    pub on_failure: Option<FailureCallback>,
}

impl ConnectionOptions {
    /// Install a failure callback.
    #[must_use]
    pub fn with_on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionFailure) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(f));
        self
    }

    /// Never reconnect.
    #[must_use]
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = false;
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ConnectionOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            reconnect: settings.reconnect,
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            on_failure: None,
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("reconnect", &self.reconnect)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Suppresses repeated identical failure callbacks.
struct FailureReporter {
    callback: Option<FailureCallback>,
    last: Option<String>,
}

impl FailureReporter {
    fn report(&mut self, failure: &ConnectionFailure) {
        let fingerprint = failure.fingerprint();
        if self.last.as_deref() == Some(fingerprint.as_str()) {
            trace!(channel = %failure.channel_id, "suppressing repeated failure");
            return;
        }
        self.last = Some(fingerprint);
        if let Some(callback) = &self.callback {
            callback(failure);
        }
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// A live connection owned by the subscription manager.
pub(crate) struct ManagedConnection {
    signature: Signature,
    context: ChannelContext,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ManagedConnection {
    /// Spawn the connection task. Must be called inside a tokio runtime.
    pub(crate) fn spawn(
        endpoint: &str,
        resolved: &ResolvedSubscription,
        transport: Arc<dyn Transport>,
        options: ConnectionOptions,
    ) -> Self {
        let signature = resolved.signature(endpoint);
        let health = ObservableCell::new(HealthPayload::connecting());
        let store = TopicStore::new();
        let context = ChannelContext::new(
            resolved.channel_id.clone(),
            resolved.topics.clone(),
            health.reader(),
            store.clone(),
        );
        let cancel = CancellationToken::new();

        let task = ConnectionTask {
            endpoint: endpoint.to_owned(),
            request: resolved.request(),
            transport,
            health,
            store,
            reporter: FailureReporter {
                callback: options.on_failure.clone(),
                last: None,
            },
            options,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        Self {
            signature,
            context,
            cancel,
            handle,
        }
    }

    pub(crate) fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn context(&self) -> &ChannelContext {
        &self.context
    }

    /// Stop the task and drop its stream. Idempotent.
    pub(crate) fn teardown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        debug!(channel = %self.context.channel_id(), "tearing down connection");
        self.cancel.cancel();
        self.handle.abort();
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        self.teardown();
    }
}

enum StreamEnd {
    /// Server reported degradation; the detail is already recorded.
    Degraded,
    /// Stream ended or failed at the transport level.
    Transport(String),
}

struct ConnectionTask {
    endpoint: String,
    request: SubscriptionRequest,
    transport: Arc<dyn Transport>,
    health: ObservableCell<HealthPayload>,
    store: TopicStore,
    reporter: FailureReporter,
    options: ConnectionOptions,
    cancel: CancellationToken,
}

impl ConnectionTask {
    async fn run(mut self) {
        let channel = self.request.channel.clone();
        loop {
            self.set_health(HealthPayload::connecting());
            let opened = tokio::select! {
                () = self.cancel.cancelled() => return,
                opened = self.transport.open(&self.endpoint, &self.request) => opened,
            };

            let retry = match opened {
                Err(err) => {
                    warn!(channel = %channel, error = %err, "failed to open subscription stream");
                    self.set_health(HealthPayload::degraded(err.to_string()));
                    self.reporter.report(&ConnectionFailure::from_transport(&channel, &err));
                    !err.is_terminal()
                }
                Ok(mut events) => {
                    let end = loop {
                        let next = tokio::select! {
                            () = self.cancel.cancelled() => return,
                            next = events.next() => next,
                        };
                        match next {
                            Some(Ok(event)) => {
                                if self.handle_event(&channel, &event) {
                                    break StreamEnd::Degraded;
                                }
                            }
                            Some(Err(err)) => break StreamEnd::Transport(err.to_string()),
                            None => break StreamEnd::Transport(CONNECTION_CLOSED.to_owned()),
                        }
                    };
                    drop(events);
                    if let StreamEnd::Transport(detail) = end {
                        info!(channel = %channel, detail = %detail, "subscription stream ended");
                        self.set_health(HealthPayload::degraded(detail.clone()));
                        self.reporter.report(&ConnectionFailure::new(&channel, detail));
                    }
                    true
                }
            };

            if !retry || !self.options.reconnect {
                debug!(channel = %channel, "connection will not reconnect");
                return;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(self.options.reconnect_delay) => {}
            }
        }
    }

    /// Apply one event. Returns `true` when the server degraded the stream.
    fn handle_event(&mut self, channel: &str, event: &SseEvent) -> bool {
        match event.event.as_str() {
            HEALTH_EVENT => match serde_json::from_str::<HealthPayload>(&event.data) {
                Ok(payload) => {
                    let degraded = payload.status == HealthStatus::Degraded;
                    if degraded {
                        let detail = payload.detail.clone().unwrap_or_else(|| CONNECTION_CLOSED.to_owned());
                        warn!(channel = %channel, detail = %detail, "server degraded the stream");
                        self.reporter.report(&ConnectionFailure::new(channel, detail));
                    }
                    self.set_health(payload);
                    degraded
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "invalid health event");
                    false
                }
            },
            MESSAGE_EVENT => {
                match serde_json::from_str::<TopicEnvelope>(&event.data) {
                    Ok(envelope) => {
                        // A delivered message proves the condition behind any
                        // earlier failure has cleared.
                        self.reporter.reset();
                        self.store.publish(envelope);
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "invalid message event"),
                }
                false
            }
            other => {
                trace!(channel = %channel, event = other, "ignoring event");
                false
            }
        }
    }

    fn set_health(&self, payload: HealthPayload) {
        self.health.update(|current| {
            if current.status == payload.status && current.detail == payload.detail {
                return false;
            }
            *current = payload;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SubscriptionDescriptor;
    use crate::transport::mock::MockTransport;
    use parking_lot::Mutex;
    use relay_core::ChannelIdentity;
    use serde_json::json;

    const ENDPOINT: &str = "http://relay.test/api/realtime";

    fn resolved() -> ResolvedSubscription {
        SubscriptionDescriptor::new(ChannelIdentity::new("demo").with_topics(["message"]))
            .resolve()
            .unwrap()
    }

    fn recording() -> (ConnectionOptions, Arc<Mutex<Vec<ConnectionFailure>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = ConnectionOptions {
            reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            on_failure: None,
        }
        .with_on_failure(move |f| sink.lock().push(f.clone()));
        (options, seen)
    }

    fn health(payload: &HealthPayload) -> SseEvent {
        SseEvent {
            event: HEALTH_EVENT.into(),
            data: serde_json::to_string(payload).unwrap(),
        }
    }

    fn message(envelope: &TopicEnvelope) -> SseEvent {
        SseEvent {
            event: MESSAGE_EVENT.into(),
            data: serde_json::to_string(envelope).unwrap(),
        }
    }

    fn forbidden() -> TransportError {
        TransportError::Status {
            status: 403,
            status_text: "Forbidden".into(),
            message: "Forbidden".into(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn fingerprint_shape() {
        let failure = ConnectionFailure::from_transport("demo", &forbidden());
        assert_eq!(failure.fingerprint(), "Forbidden|403|Forbidden");
        assert_eq!(ConnectionFailure::new("demo", "gone").fingerprint(), "gone||");
    }

    #[tokio::test(start_paused = true)]
    async fn events_update_health_and_store() {
        let transport = Arc::new(MockTransport::new());
        let conn = ManagedConnection::spawn(ENDPOINT, &resolved(), transport.clone(), ConnectionOptions::default());
        settle().await;
        assert_eq!(conn.context().status(), HealthStatus::Connecting);

        let feed = transport.feed("demo").unwrap();
        feed.send(Ok(health(&HealthPayload::connected()))).unwrap();
        feed.send(Ok(message(&TopicEnvelope::new("message", json!({"n": 1}))))).unwrap();
        settle().await;

        assert_eq!(conn.context().status(), HealthStatus::Connected);
        let latest = conn.context().messages().latest("message").unwrap();
        assert_eq!(latest.data, json!({"n": 1}));

        let opened = transport.opens();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].topics.as_deref(), Some(&["message".to_owned()][..]));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_request_is_terminal() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(forbidden());
        let (options, seen) = recording();
        let conn = ManagedConnection::spawn(ENDPOINT, &resolved(), transport.clone(), options);
        settle().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.opens().len(), 1);
        let health = conn.context().health().get();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(!health.ok);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status, Some(403));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_reported_once() {
        let transport = Arc::new(MockTransport::new());
        for _ in 0..3 {
            transport.push_error(TransportError::Request("connection refused".into()));
        }
        let (options, seen) = recording();
        let _conn = ManagedConnection::spawn(ENDPOINT, &resolved(), transport.clone(), options);
        settle().await;
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            settle().await;
        }

        assert_eq!(transport.opens().len(), 4);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_close_degrades_and_reconnects() {
        let transport = Arc::new(MockTransport::new());
        let (options, seen) = recording();
        let conn = ManagedConnection::spawn(ENDPOINT, &resolved(), transport.clone(), options);
        settle().await;

        transport.close_feeds();
        settle().await;
        let health = conn.context().health().get();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.detail.as_deref(), Some(CONNECTION_CLOSED));
        assert_eq!(seen.lock()[0].message, CONNECTION_CLOSED);

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(transport.opens().len(), 2);
        assert_eq!(conn.context().status(), HealthStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn server_degrade_keeps_server_detail() {
        let transport = Arc::new(MockTransport::new());
        let (options, seen) = recording();
        let conn = ManagedConnection::spawn(ENDPOINT, &resolved(), transport.clone(), options.without_reconnect());
        settle().await;

        let feed = transport.feed("demo").unwrap();
        feed.send(Ok(health(&HealthPayload::connected()))).unwrap();
        feed.send(Ok(health(&HealthPayload::degraded("Message topic is not authorized"))))
            .unwrap();
        settle().await;

        let health = conn.context().health().get();
        assert_eq!(health.detail.as_deref(), Some("Message topic is not authorized"));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "Message topic is not authorized");
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_releases_stream() {
        let transport = Arc::new(MockTransport::new());
        let conn = ManagedConnection::spawn(ENDPOINT, &resolved(), transport.clone(), ConnectionOptions::default());
        settle().await;
        let feed = transport.feed("demo").unwrap();

        conn.teardown();
        conn.teardown();
        settle().await;
        assert!(feed.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_tears_down() {
        let transport = Arc::new(MockTransport::new());
        let conn = ManagedConnection::spawn(ENDPOINT, &resolved(), transport.clone(), ConnectionOptions::default());
        settle().await;
        let feed = transport.feed("demo").unwrap();
        drop(conn);
        settle().await;
        assert!(feed.is_closed());
    }
}
