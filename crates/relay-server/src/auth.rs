//! Authorization engine.
//!
//! Request time: requested topics are validated against the resolved channel,
//! then the entry's [`Authorize`] callback decides which of them the caller
//! gets. Message time (opt-in): every upstream envelope is checked against the
//! session before it is forwarded, and either the dedicated [`Reauthorize`]
//! callback or `authorize` itself is asked again about that single topic.
//!
//! Everything fails closed. Callback errors and panics are denials.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use futures::FutureExt;
use relay_core::{
    AuthorizationOutcome, ChannelIdentity, FailureContext, FailureStage, Params,
    SubscriptionRequest, TopicEnvelope,
};
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::errors::{AuthError, Failure};

/// What an authorization callback gets to look at.
#[derive(Clone, Debug)]
pub struct AuthorizeContext {
    /// Resolved channel name.
    pub channel: String,
    /// Topics being asked for. A single topic during reauthorization.
    pub topics: Vec<String>,
    /// Caller identity and headers.
    pub request: Arc<RequestContext>,
    /// Request params.
    pub params: Arc<Params>,
    /// Registry entry that matched.
    pub registry_key: String,
}

impl AuthorizeContext {
    /// Same context narrowed to one topic.
    #[must_use]
    pub fn for_topic(&self, topic: &str) -> Self {
        Self {
            topics: vec![topic.to_string()],
            ..self.clone()
        }
    }

    /// Caller id, if any.
    pub fn caller(&self) -> Option<&str> {
        self.request.caller.as_deref()
    }
}

/// Request-time authorization callback.
#[async_trait]
pub trait Authorize: Send + Sync {
    /// Decide which of `ctx.topics` the caller may receive.
    async fn authorize(&self, ctx: &AuthorizeContext) -> Result<AuthorizationOutcome, AuthError>;
}

/// Dedicated per-message reauthorization callback.
///
/// Only [`AuthorizationOutcome::Allow`] lets the message through. A subset,
/// even one naming the message topic, is a denial.
#[async_trait]
pub trait Reauthorize: Send + Sync {
    /// Decide whether the single topic in `ctx.topics` may still be delivered.
    async fn reauthorize(&self, ctx: &AuthorizeContext)
    -> Result<AuthorizationOutcome, AuthError>;
}

/// Adapts a synchronous closure into an [`Authorize`] or [`Reauthorize`].
pub struct FnAuthorizer<F>(pub F);

#[async_trait]
impl<F> Authorize for FnAuthorizer<F>
where
    F: Fn(&AuthorizeContext) -> Result<AuthorizationOutcome, AuthError> + Send + Sync,
{
    async fn authorize(&self, ctx: &AuthorizeContext) -> Result<AuthorizationOutcome, AuthError> {
        (self.0)(ctx)
    }
}

#[async_trait]
impl<F> Reauthorize for FnAuthorizer<F>
where
    F: Fn(&AuthorizeContext) -> Result<AuthorizationOutcome, AuthError> + Send + Sync,
{
    async fn reauthorize(
        &self,
        ctx: &AuthorizeContext,
    ) -> Result<AuthorizationOutcome, AuthError> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a shared [`Authorize`].
pub fn authorize_fn<F>(f: F) -> Arc<dyn Authorize>
where
    F: Fn(&AuthorizeContext) -> Result<AuthorizationOutcome, AuthError> + Send + Sync + 'static,
{
    Arc::new(FnAuthorizer(f))
}

/// Wrap a closure as a shared [`Reauthorize`].
pub fn reauthorize_fn<F>(f: F) -> Arc<dyn Reauthorize>
where
    F: Fn(&AuthorizeContext) -> Result<AuthorizationOutcome, AuthError> + Send + Sync + 'static,
{
    Arc::new(FnAuthorizer(f))
}

/// Allow everything. For development registries only.
pub fn allow_all() -> Arc<dyn Authorize> {
    authorize_fn(|_| Ok(AuthorizationOutcome::Allow))
}

/// Outcome of a successful request-time authorization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizedSession {
    /// The resolved channel.
    pub channel: ChannelIdentity,
    /// Topics the caller may receive, in request order.
    pub authorized_topics: Vec<String>,
    /// Whether every message is checked again before forwarding.
    pub reauthorize_on_each_message: bool,
}

impl AuthorizedSession {
    /// Whether `topic` was granted.
    pub fn is_authorized(&self, topic: &str) -> bool {
        self.authorized_topics.iter().any(|t| t == topic)
    }
}

/// Requested topics, defaulting to every channel topic.
///
/// Returns the unknown topics as the error.
pub fn requested_topics(
    request: &SubscriptionRequest,
    channel: &ChannelIdentity,
) -> Result<Vec<String>, Vec<String>> {
    let requested = match &request.topics {
        Some(topics) if !topics.is_empty() => topics.clone(),
        _ => channel.topic_names(),
    };
    let invalid: Vec<String> = requested
        .iter()
        .filter(|t| !channel.has_topic(t))
        .cloned()
        .collect();
    if invalid.is_empty() {
        Ok(requested)
    } else {
        Err(invalid)
    }
}

async fn call_authorize(
    authorize: &dyn Authorize,
    ctx: &AuthorizeContext,
) -> Result<AuthorizationOutcome, AuthError> {
    AssertUnwindSafe(authorize.authorize(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(AuthError::new("authorization callback panicked")))
}

async fn call_reauthorize(
    reauthorize: &dyn Reauthorize,
    ctx: &AuthorizeContext,
) -> Result<AuthorizationOutcome, AuthError> {
    AssertUnwindSafe(reauthorize.reauthorize(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(AuthError::new("reauthorization callback panicked")))
}

/// Request-time authorization.
///
/// Topic validation runs first and never reaches the callback.
pub async fn authorize_request(
    authorize: &dyn Authorize,
    channel: &ChannelIdentity,
    request: &SubscriptionRequest,
    base: AuthorizeContext,
    reauthorize_on_each_message: bool,
) -> Result<AuthorizedSession, Failure> {
    let requested = requested_topics(request, channel).map_err(|invalid| {
        Failure::new(
            FailureStage::TopicValidation,
            StatusCode::BAD_REQUEST,
            format!("Unknown topics: {}", invalid.join(", ")),
        )
        .map_context(|c| c.with_channel(&channel.name).with_topics(invalid))
    })?;

    let ctx = AuthorizeContext {
        topics: requested.clone(),
        ..base
    };
    let forbidden = |message: String| {
        Failure::new(FailureStage::Authorization, StatusCode::FORBIDDEN, message)
            .map_context(|c| c.with_channel(&channel.name).with_topics(requested.clone()))
    };

    let outcome = match call_authorize(authorize, &ctx).await {
        Ok(outcome) => outcome,
        Err(error) => {
            info!(channel = %channel.name, error = %error, "authorization callback failed");
            return Err(forbidden(error.message.clone()).map_context(|c| c.with_cause(error.message)));
        }
    };

    match outcome.granted(&requested) {
        Some(authorized_topics) => {
            debug!(channel = %channel.name, topics = ?authorized_topics, "authorized");
            Ok(AuthorizedSession {
                channel: channel.clone(),
                authorized_topics,
                reauthorize_on_each_message,
            })
        }
        None => {
            info!(channel = %channel.name, caller = ?ctx.caller(), "authorization denied");
            Err(forbidden("Forbidden".to_string()))
        }
    }
}

/// Per-message gate held by a stream pump.
#[derive(Clone)]
pub struct Reauthorizer {
    session: AuthorizedSession,
    base: AuthorizeContext,
    authorize: Arc<dyn Authorize>,
    reauthorize: Option<Arc<dyn Reauthorize>>,
}

impl Reauthorizer {
    /// Build a gate for `session`.
    pub fn new(
        session: AuthorizedSession,
        base: AuthorizeContext,
        authorize: Arc<dyn Authorize>,
        reauthorize: Option<Arc<dyn Reauthorize>>,
    ) -> Self {
        Self {
            session,
            base,
            authorize,
            reauthorize,
        }
    }

    /// Check one envelope. `Err` carries a `reauthorization` failure.
    pub async fn check(&self, envelope: &TopicEnvelope) -> Result<(), FailureContext> {
        let channel = &self.session.channel.name;
        let fail = |message: &str| {
            FailureContext::new(FailureStage::Reauthorization, message)
                .with_status(StatusCode::FORBIDDEN.as_u16())
                .with_channel(channel)
        };

        let Some(topic) = envelope.topic() else {
            return Err(fail("Message is missing a topic"));
        };
        if !self.session.channel.has_topic(topic) {
            return Err(fail("Message topic is not part of the channel").with_topics([topic]));
        }
        if !self.session.is_authorized(topic) {
            return Err(fail("Message topic is not authorized").with_topics([topic]));
        }

        let ctx = self.base.for_topic(topic);
        let allowed = if let Some(reauthorize) = &self.reauthorize {
            call_reauthorize(reauthorize.as_ref(), &ctx)
                .await
                .map(|outcome| outcome == AuthorizationOutcome::Allow)
        } else {
            call_authorize(self.authorize.as_ref(), &ctx)
                .await
                .map(|outcome| outcome.granted(&ctx.topics).is_some())
        };

        match allowed {
            Ok(true) => Ok(()),
            Ok(false) => Err(fail("Forbidden").with_topics([topic])),
            Err(error) => Err(fail(&error.message)
                .with_topics([topic])
                .with_cause(error.message)),
        }
    }

    /// The session this gate protects.
    pub fn session(&self) -> &AuthorizedSession {
        &self.session
    }
}
