//! Stream pump: drives one server-to-client stream from token acquisition to
//! teardown.
//!
//! ```text
//! Connecting ──► Connected ──► Degraded ──► Closed
//!      │             │  ▲                     ▲
//!      │             └──┘ (message / tick)    │
//!      └──────────────────────────────────────┘
//! ```
//!
//! The pump owns its upstream reader, its liveness timer and its stream lease
//! exclusively. Every exit path (client disconnect, upstream end, failure,
//! shutdown) funnels into [`StreamPump::teardown`], which runs at most once.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use relay_core::{
    FailureContext, FailureStage, HEALTH_EVENT, HealthPayload, MESSAGE_EVENT, TopicEnvelope,
};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthorizedSession, Reauthorizer};
use crate::errors::UpstreamError;
use crate::failure::FailureResolver;
use crate::lease::StreamLease;
use crate::metrics::{
    LIVENESS_TICKS_TOTAL, MESSAGES_FORWARDED_TOTAL, REAUTHORIZATION_DENIALS_TOTAL,
    STREAMS_CLOSED_TOTAL,
};
use crate::sink::EventSink;
use crate::upstream::{EnvelopeStream, SubscriptionToken, Upstream};

/// Upper bound on the best-effort upstream cancel during teardown.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pump lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpState {
    /// Acquiring the upstream subscription.
    Connecting,
    /// Forwarding messages.
    Connected,
    /// A failure was reported; teardown follows.
    Degraded,
    /// Torn down. Terminal.
    Closed,
}

/// Why a pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away.
    ClientClosed,
    /// The upstream sequence ended.
    UpstreamEnded,
    /// A stream-time failure was reported as `health=degraded`.
    Degraded,
    /// Server shutdown.
    Shutdown,
    /// The push transport rejected an event.
    EmitFailed,
}

impl CloseReason {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::UpstreamEnded => "upstream_ended",
            Self::Degraded => "degraded",
            Self::Shutdown => "shutdown",
            Self::EmitFailed => "emit_failed",
        }
    }
}

type Acquired = Result<(SubscriptionToken, EnvelopeStream), (Option<SubscriptionToken>, UpstreamError)>;

async fn acquire<U: Upstream + ?Sized>(
    upstream: &U,
    channel: &str,
    topics: &[String],
) -> Acquired {
    let token = upstream
        .issue_token(channel, topics)
        .await
        .map_err(|e| (None, e))?;
    match upstream.subscribe(&token).await {
        Ok(stream) => Ok((token, stream)),
        Err(e) => Err((Some(token), e)),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// One stream's worth of state.
pub struct StreamPump<U: Upstream + ?Sized, S: EventSink> {
    session: AuthorizedSession,
    upstream: Arc<U>,
    sink: S,
    reauthorizer: Option<Reauthorizer>,
    resolver: FailureResolver,
    liveness: Option<Duration>,
    cancel: CancellationToken,
    lease: Option<StreamLease>,
    token: Option<SubscriptionToken>,
    state: PumpState,
}

impl<U: Upstream + ?Sized, S: EventSink> StreamPump<U, S> {
    /// Pump for an authorized session with no reauthorization, no liveness
    /// ticks and no failure hook.
    pub fn new(session: AuthorizedSession, upstream: Arc<U>, sink: S) -> Self {
        Self {
            session,
            upstream,
            sink,
            reauthorizer: None,
            resolver: FailureResolver::new(),
            liveness: None,
            cancel: CancellationToken::new(),
            lease: None,
            token: None,
            state: PumpState::Connecting,
        }
    }

    /// Check every message through `gate` before forwarding.
    #[must_use]
    pub fn with_reauthorizer(mut self, gate: Option<Reauthorizer>) -> Self {
        self.reauthorizer = gate;
        self
    }

    /// Resolve stream-time failure details through `resolver`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: FailureResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Emit `health=connected` every `interval` while connected.
    #[must_use]
    pub fn with_liveness(mut self, interval: Option<Duration>) -> Self {
        self.liveness = interval.filter(|d| !d.is_zero());
        self
    }

    /// Stop when `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Hold `lease` until teardown.
    #[must_use]
    pub fn with_lease(mut self, lease: StreamLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Current state.
    pub fn state(&self) -> PumpState {
        self.state
    }

    fn conn_id(&self) -> &str {
        self.lease.as_ref().map_or("detached", StreamLease::conn_id)
    }

    /// Drive the stream to completion.
    pub async fn run(mut self) -> CloseReason {
        let reason = self.drive().await;
        let _ = self.teardown(reason).await;
        reason
    }

    async fn drive(&mut self) -> CloseReason {
        if let Some(reason) = self.emit_health(HealthPayload::connecting()).await {
            return reason;
        }

        let acquired = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return CloseReason::Shutdown,
            () = self.sink.closed() => return CloseReason::ClientClosed,
            acquired = acquire(
                self.upstream.as_ref(),
                &self.session.channel.name,
                &self.session.authorized_topics,
            ) => acquired,
        };
        let mut stream = match acquired {
            Ok((token, stream)) => {
                self.token = Some(token);
                stream
            }
            Err((token, error)) => {
                self.token = token;
                return self.degrade(self.stream_failure(&error)).await;
            }
        };

        self.state = PumpState::Connected;
        if let Some(reason) = self.emit_health(HealthPayload::connected()).await {
            return reason;
        }
        info!(
            conn_id = %self.conn_id(),
            channel = %self.session.channel.name,
            topics = ?self.session.authorized_topics,
            "stream connected"
        );

        let mut ticker = self.liveness.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return CloseReason::Shutdown,
                () = self.sink.closed() => return CloseReason::ClientClosed,
                () = next_tick(&mut ticker) => {
                    metrics::counter!(LIVENESS_TICKS_TOTAL).increment(1);
                    if let Some(reason) = self.emit_health(HealthPayload::connected()).await {
                        return reason;
                    }
                }
                item = stream.next() => match item {
                    None => return CloseReason::UpstreamEnded,
                    Some(Err(error)) => return self.degrade(self.stream_failure(&error)).await,
                    Some(Ok(envelope)) => {
                        if let Some(reason) = self.forward(envelope).await {
                            return reason;
                        }
                    }
                },
            }
        }
    }

    async fn forward(&mut self, envelope: TopicEnvelope) -> Option<CloseReason> {
        if let Some(gate) = &self.reauthorizer {
            if let Err(context) = gate.check(&envelope).await {
                metrics::counter!(REAUTHORIZATION_DENIALS_TOTAL).increment(1);
                return Some(self.degrade(context).await);
            }
        } else if !envelope.topic().is_some_and(|t| self.session.is_authorized(t)) {
            debug!(
                conn_id = %self.conn_id(),
                channel = %self.session.channel.name,
                topic = ?envelope.topic(),
                "dropped message outside the authorized topics"
            );
            return None;
        }

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(error) => {
                let context = FailureContext::new(FailureStage::Stream, "Failed to encode message")
                    .with_channel(&self.session.channel.name)
                    .with_cause(error.to_string());
                return Some(self.degrade(context).await);
            }
        };

        if let Some(reason) = self.push(MESSAGE_EVENT, payload).await {
            return Some(reason);
        }
        metrics::counter!(MESSAGES_FORWARDED_TOTAL).increment(1);
        debug!(
            conn_id = %self.conn_id(),
            channel = %self.session.channel.name,
            topic = ?envelope.topic(),
            "forwarded message"
        );
        None
    }

    fn stream_failure(&self, error: &UpstreamError) -> FailureContext {
        FailureContext::new(FailureStage::Stream, "Stream failed")
            .with_channel(&self.session.channel.name)
            .with_topics(self.session.authorized_topics.iter().cloned())
            .with_cause(error.to_string())
    }

    /// Push one event. `Some` means the pump has to stop.
    ///
    /// A full send queue does not hold off shutdown.
    async fn push(&self, event: &str, data: String) -> Option<CloseReason> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(CloseReason::Shutdown),
            emitted = self.sink.emit(event, data) => match emitted {
                Ok(()) => None,
                Err(error) => {
                    debug!(conn_id = %self.conn_id(), event, error = %error, "emit failed");
                    Some(CloseReason::EmitFailed)
                }
            },
        }
    }

    async fn emit_health(&self, payload: HealthPayload) -> Option<CloseReason> {
        match serde_json::to_string(&payload) {
            Ok(data) => self.push(HEALTH_EVENT, data).await,
            Err(error) => {
                debug!(conn_id = %self.conn_id(), error = %error, "health encode failed");
                Some(CloseReason::EmitFailed)
            }
        }
    }

    /// Report a stream-time failure as `health=degraded`.
    ///
    /// Emits at most once per pump; later calls and calls after teardown are
    /// no-ops.
    async fn degrade(&mut self, context: FailureContext) -> CloseReason {
        if matches!(self.state, PumpState::Degraded | PumpState::Closed) {
            return CloseReason::Degraded;
        }
        self.state = PumpState::Degraded;
        let detail = self.resolver.resolve(&context);
        warn!(
            conn_id = %self.conn_id(),
            channel = %self.session.channel.name,
            stage = %context.stage,
            topics = ?context.topics,
            detail = %detail,
            "stream degraded"
        );
        if let Some(reason) = self.emit_health(HealthPayload::degraded(detail)).await {
            debug!(conn_id = %self.conn_id(), reason = reason.as_str(), "degraded health not delivered");
        }
        CloseReason::Degraded
    }

    /// Release the upstream token and the stream lease.
    ///
    /// Returns `false` if the pump was already closed.
    pub async fn teardown(&mut self, reason: CloseReason) -> bool {
        if self.state == PumpState::Closed {
            return false;
        }
        self.state = PumpState::Closed;

        if let Some(token) = self.token.take() {
            match time::timeout(CANCEL_TIMEOUT, self.upstream.cancel(&token)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(conn_id = %self.conn_id(), error = %error, "upstream cancel failed");
                }
                Err(_) => warn!(conn_id = %self.conn_id(), "upstream cancel timed out"),
            }
        }

        metrics::counter!(STREAMS_CLOSED_TOTAL, "reason" => reason.as_str()).increment(1);
        info!(
            conn_id = %self.conn_id(),
            channel = %self.session.channel.name,
            reason = reason.as_str(),
            "stream closed"
        );
        if let Some(lease) = self.lease.take() {
            let _ = lease.release();
        }
        true
    }
}
