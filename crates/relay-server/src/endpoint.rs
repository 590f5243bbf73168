//! Bus endpoint: turns one POSTed subscription request into one SSE stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use relay_core::SubscriptionRequest;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span};

use crate::auth::{AuthorizeContext, AuthorizedSession, Reauthorizer, authorize_request};
use crate::config::EndpointConfig;
use crate::context::RequestContext;
use crate::errors::{Failure, ResolvedFailure};
use crate::failure::FailureResolver;
use crate::lease::StreamRegistry;
use crate::metrics::{OUTCOME_ACCEPTED, REQUESTS_TOTAL};
use crate::pump::StreamPump;
use crate::registry::ChannelRegistry;
use crate::sink::{ChannelSink, PushEvent};
use crate::upstream::Upstream;

/// Everything the endpoint needs to serve subscriptions.
pub struct BusEndpoint {
    config: EndpointConfig,
    registry: ChannelRegistry,
    upstream: Arc<dyn Upstream>,
    resolver: FailureResolver,
    streams: StreamRegistry,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl BusEndpoint {
    /// Endpoint with no failure hook and its own shutdown token.
    pub fn new(config: EndpointConfig, registry: ChannelRegistry, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            config,
            registry,
            upstream,
            resolver: FailureResolver::new(),
            streams: StreamRegistry::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Route every failure through `resolver`.
    #[must_use]
    pub fn with_failure_resolver(mut self, resolver: FailureResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Stop every pump when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Open-stream bookkeeping.
    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Tracker for spawned pumps.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Validate, resolve and authorize a request.
    pub async fn authorize(
        &self,
        ctx: RequestContext,
        body: &[u8],
    ) -> Result<(AuthorizedSession, Option<Reauthorizer>), Failure> {
        let request = SubscriptionRequest::from_slice(body).map_err(|e| Failure::bad_request(e.to_string()))?;
        let resolved = self.registry.resolve(&ctx, &request)?;
        let entry = resolved.entry;
        let reauthorize = entry.reauthorizes(self.config.reauthorize_on_each_message);

        let base = AuthorizeContext {
            channel: resolved.channel.name.clone(),
            topics: Vec::new(),
            request: Arc::new(ctx),
            params: Arc::new(request.params.clone()),
            registry_key: entry.key.clone(),
        };
        let session = authorize_request(
            entry.authorize.as_ref(),
            &resolved.channel,
            &request,
            base.clone(),
            reauthorize,
        )
        .await?;

        let gate = reauthorize.then(|| {
            Reauthorizer::new(
                session.clone(),
                base,
                entry.authorize.clone(),
                entry.reauthorize.clone(),
            )
        });
        Ok((session, gate))
    }

    /// Handle one request. On success the pump is running and the receiver
    /// yields its push events.
    pub async fn open(
        &self,
        ctx: RequestContext,
        body: &[u8],
    ) -> Result<mpsc::Receiver<PushEvent>, ResolvedFailure> {
        let (session, gate) = match self.authorize(ctx, body).await {
            Ok(authorized) => authorized,
            Err(failure) => {
                metrics::counter!(REQUESTS_TOTAL, "outcome" => failure.stage().as_str()).increment(1);
                debug!(
                    stage = %failure.stage(),
                    status = failure.status.as_u16(),
                    channel = ?failure.context.channel,
                    "subscription request rejected"
                );
                return Err(self.resolver.resolve_failure(&failure));
            }
        };
        metrics::counter!(REQUESTS_TOTAL, "outcome" => OUTCOME_ACCEPTED).increment(1);

        let (sink, rx) = ChannelSink::new(self.config.send_queue);
        let lease = self.streams.acquire();
        let span = info_span!("stream", conn_id = %lease.conn_id(), channel = %session.channel.name);
        let pump = StreamPump::new(session, self.upstream.clone(), sink)
            .with_reauthorizer(gate)
            .with_resolver(self.resolver.clone())
            .with_liveness(self.config.liveness.effective_interval())
            .with_cancel(self.shutdown.child_token())
            .with_lease(lease);
        let _ = self.tasks.spawn(pump.run().instrument(span));
        Ok(rx)
    }

    /// Router serving `POST <config.path>`.
    pub fn router(self: Arc<Self>) -> Router {
        let path = self.config.path.clone();
        Router::new()
            .route(&path, post(subscribe_handler))
            .with_state(self)
    }
}

/// SSE body draining a pump's receiver.
pub fn sse_body(rx: mpsc::Receiver<PushEvent>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx)
        .map(|push| Ok::<_, Infallible>(Event::default().event(push.event).data(push.data)));
    Sse::new(stream)
}

/// POST <path>
async fn subscribe_handler(
    State(endpoint): State<Arc<BusEndpoint>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = RequestContext::from_headers(&headers);
    match endpoint.open(ctx, &body).await {
        Ok(rx) => sse_body(rx).into_response(),
        Err(failure) => failure.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{allow_all, authorize_fn};
    use crate::config::LivenessConfig;
    use crate::registry::RegistryEntry;
    use crate::upstream::InMemoryUpstream;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use relay_core::{
        AuthorizationOutcome, ChannelIdentity, ChannelSpec, HEALTH_EVENT, HealthPayload,
        HealthStatus, MESSAGE_EVENT, TopicEnvelope,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn demo() -> ChannelIdentity {
        ChannelIdentity::new("demo").with_topics(["message", "admin-message"])
    }

    fn endpoint_with(registry: ChannelRegistry, hub: Arc<InMemoryUpstream>) -> Arc<BusEndpoint> {
        let config = EndpointConfig {
            liveness: LivenessConfig::disabled(),
            ..EndpointConfig::default()
        };
        Arc::new(BusEndpoint::new(config, registry, hub))
    }

    fn demo_registry() -> ChannelRegistry {
        ChannelRegistry::new()
            .with_entry(RegistryEntry::new("demo", demo(), allow_all()))
            .with_entry(RegistryEntry::new(
                "user",
                ChannelSpec::prefixed("user", ["notice"]),
                authorize_fn(|ctx| {
                    let own = ctx.caller().map(|c| format!("user:{c}"));
                    Ok((own.as_deref() == Some(ctx.channel.as_str())).into())
                }),
            )
            .with_params_resolver(|_, requested, _| {
                Ok(requested.strip_prefix("user:").unwrap_or(requested).to_string())
            }))
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/realtime")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn error_body(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let app = endpoint_with(demo_registry(), Arc::new(InMemoryUpstream::new())).router();
        let resp = app.oneshot(post("{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(resp).await["stage"], "request-validation");
    }

    #[tokio::test]
    async fn missing_channel_is_400() {
        let app = endpoint_with(demo_registry(), Arc::new(InMemoryUpstream::new())).router();
        let resp = app.oneshot(post(r#"{"topics": ["message"]}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_channel_is_400_and_opens_nothing() {
        let endpoint = endpoint_with(demo_registry(), Arc::new(InMemoryUpstream::new()));
        let resp = endpoint.clone().router().oneshot(post(r#"{"channel": "nope"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = error_body(resp).await;
        assert_eq!(body["stage"], "channel-resolution");
        assert_eq!(body["error"], "Requested channel is not available");
        assert_eq!(endpoint.streams().opened(), 0);
    }

    #[tokio::test]
    async fn ambiguous_registry_is_500() {
        let registry = demo_registry().with_entry(RegistryEntry::new("demo-again", demo(), allow_all()));
        let endpoint = endpoint_with(registry, Arc::new(InMemoryUpstream::new()));
        let resp = endpoint.clone().router().oneshot(post(r#"{"channel": "demo"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(endpoint.streams().opened(), 0);
    }

    #[tokio::test]
    async fn unknown_topic_is_400() {
        let app = endpoint_with(demo_registry(), Arc::new(InMemoryUpstream::new())).router();
        let resp = app
            .oneshot(post(r#"{"channel": "demo", "topics": ["message", "bogus"]}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = error_body(resp).await;
        assert_eq!(body["stage"], "topic-validation");
        assert_eq!(body["error"], "Unknown topics: bogus");
    }

    #[tokio::test]
    async fn other_users_channel_is_403() {
        let app = endpoint_with(demo_registry(), Arc::new(InMemoryUpstream::new())).router();
        let req = Request::builder()
            .method("POST")
            .uri("/api/realtime")
            .header("authorization", "Bearer bob")
            .body(Body::from(r#"{"channel": "user:alice"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_body(resp).await["error"], "Forbidden");
    }

    #[tokio::test]
    async fn failure_hook_overrides_json_error() {
        let registry = ChannelRegistry::new().with_entry(RegistryEntry::new(
            "demo",
            demo(),
            authorize_fn(|_| Ok(AuthorizationOutcome::allow_topics(Vec::<String>::new()))),
        ));
        let endpoint = BusEndpoint::new(EndpointConfig::default(), registry, Arc::new(InMemoryUpstream::new()))
            .with_failure_resolver(FailureResolver::with_hook(|ctx| {
                Ok(Some(format!("denied at {}", ctx.stage)))
            }));
        let resp = Arc::new(endpoint)
            .router()
            .oneshot(post(r#"{"channel": "demo"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_body(resp).await["error"], "denied at authorization");
    }

    #[tokio::test]
    async fn accepted_request_streams_sse() {
        let app = endpoint_with(demo_registry(), Arc::new(InMemoryUpstream::new())).router();
        let resp = app.oneshot(post(r#"{"channel": "demo"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/event-stream"));
    }

    #[tokio::test]
    async fn open_forwards_published_messages() {
        let hub = Arc::new(InMemoryUpstream::new());
        let endpoint = endpoint_with(demo_registry(), hub.clone());
        let mut rx = endpoint
            .open(RequestContext::anonymous(), br#"{"channel":"demo","topics":["message"]}"#)
            .await
            .unwrap();
        assert_eq!(endpoint.streams().active(), 1);

        for expected in [HealthStatus::Connecting, HealthStatus::Connected] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.event, HEALTH_EVENT);
            let payload: HealthPayload = serde_json::from_str(&event.data).unwrap();
            assert_eq!(payload.status, expected);
        }

        let _ = hub.publish("demo", TopicEnvelope::new("message", json!({"text": "hi"})).with_run_id("r1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, MESSAGE_EVENT);
        let value: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(value, json!({"topic": "message", "data": {"text": "hi"}, "runId": "r1"}));

        drop(rx);
        endpoint.tasks().close();
        endpoint.tasks().wait().await;
        assert_eq!(endpoint.streams().active(), 0);
    }

    #[tokio::test]
    async fn reauthorization_follows_entry_override() {
        let registry = ChannelRegistry::new().with_entry(
            RegistryEntry::new("demo", demo(), allow_all()).reauthorize_on_each_message(true),
        );
        let endpoint = endpoint_with(registry, Arc::new(InMemoryUpstream::new()));
        let (session, gate) = endpoint
            .authorize(RequestContext::anonymous(), br#"{"channel":"demo"}"#)
            .await
            .unwrap();
        assert!(session.reauthorize_on_each_message);
        assert!(gate.is_some());

        let endpoint = endpoint_with(demo_registry(), Arc::new(InMemoryUpstream::new()));
        let (_, gate) = endpoint
            .authorize(RequestContext::anonymous(), br#"{"channel":"demo"}"#)
            .await
            .unwrap();
        assert!(gate.is_none());
    }
}
