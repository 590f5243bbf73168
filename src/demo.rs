//! Demo channels served by `relay serve`.
//!
//! - `demo`: static channel with `message` and `admin-message`. Everyone gets
//!   `message`; admins also get `admin-message`. Reauthorized per message so a
//!   revoked admin stops receiving admin traffic on open streams.
//! - `user:<id>`: one channel per caller. The id comes from the `userId` param
//!   or the requested channel name; only the caller with that id is allowed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use relay_core::{AuthorizationOutcome, ChannelIdentity, ChannelSpec, ParamValue, TopicEnvelope};
use relay_server::{AuthError, Authorize, AuthorizeContext, ChannelRegistry, InMemoryUpstream, RegistryEntry};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registry key and channel name of the shared demo channel.
pub const DEMO_CHANNEL: &str = "demo";
/// Registry key of the per-user channel family.
pub const USER_KEY: &str = "user";
/// Topic every caller may read.
pub const MESSAGE_TOPIC: &str = "message";
/// Topic reserved for admins.
pub const ADMIN_TOPIC: &str = "admin-message";

/// Who may read what. Passed to the registry explicitly.
#[derive(Debug, Default)]
pub struct DemoPolicy {
    admins: RwLock<BTreeSet<String>>,
}

impl DemoPolicy {
    /// Policy with the given admin callers.
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: RwLock::new(admins.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether `caller` is an admin.
    pub fn is_admin(&self, caller: Option<&str>) -> bool {
        caller.is_some_and(|c| self.admins.read().contains(c))
    }

    /// Remove an admin. Returns whether it was one.
    pub fn revoke(&self, caller: &str) -> bool {
        self.admins.write().remove(caller)
    }
}

#[async_trait]
impl Authorize for DemoPolicy {
    async fn authorize(&self, ctx: &AuthorizeContext) -> Result<AuthorizationOutcome, AuthError> {
        match ctx.registry_key.as_str() {
            DEMO_CHANNEL => {
                if self.is_admin(ctx.caller()) {
                    Ok(AuthorizationOutcome::Allow)
                } else {
                    Ok(AuthorizationOutcome::allow_topics([MESSAGE_TOPIC]))
                }
            }
            USER_KEY => {
                let own = ctx.caller().map(|c| format!("{USER_KEY}:{c}"));
                Ok((own.as_deref() == Some(ctx.channel.as_str())).into())
            }
            other => Err(AuthError::new(format!("no policy for registry entry {other}"))),
        }
    }
}

/// The demo channel identity.
pub fn demo_channel() -> ChannelIdentity {
    ChannelIdentity::new(DEMO_CHANNEL).with_topics([MESSAGE_TOPIC, ADMIN_TOPIC])
}

/// Registry with the demo and per-user channels, both gated by `policy`.
pub fn registry(policy: Arc<DemoPolicy>) -> ChannelRegistry {
    let authorize: Arc<dyn Authorize> = policy;
    ChannelRegistry::new()
        .with_entry(
            RegistryEntry::new(DEMO_CHANNEL, demo_channel(), authorize.clone())
                .reauthorize_on_each_message(true),
        )
        .with_entry(
            RegistryEntry::new(
                USER_KEY,
                ChannelSpec::prefixed(USER_KEY, [MESSAGE_TOPIC, "notice"]),
                authorize,
            )
            .with_params_resolver(|_, requested, params| {
                if let Some(id) = params.get("userId").and_then(ParamValue::as_str) {
                    return Ok(id.to_owned());
                }
                let prefix = format!("{USER_KEY}:");
                Ok(requested.strip_prefix(&prefix).unwrap_or(requested).to_owned())
            }),
        )
}

fn envelope(topic: &str, seq: u64, text: String) -> TopicEnvelope {
    TopicEnvelope::new(topic, json!({ "seq": seq, "text": text }))
        .with_run_id(format!("demo-{seq}"))
        .with_created_at(json!(Utc::now().to_rfc3339()))
}

/// Publish a `message` every `interval`, and an `admin-message` every fifth
/// tick, until `cancel` fires.
pub async fn run_publisher(upstream: Arc<InMemoryUpstream>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut seq: u64 = 0;
    info!(interval_ms = interval.as_millis(), "demo publisher started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        seq += 1;
        let delivered = upstream.publish(DEMO_CHANNEL, envelope(MESSAGE_TOPIC, seq, format!("tick {seq}")));
        if seq % 5 == 0 {
            let _ = upstream.publish(DEMO_CHANNEL, envelope(ADMIN_TOPIC, seq, format!("audit {seq}")));
        }
        debug!(seq, delivered, "published demo tick");
    }
    info!(published = seq, "demo publisher stopped");
}
