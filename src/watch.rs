//! `relay watch`: subscribe through the client manager and print what arrives.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use relay_client::{
    ChannelContext, ConnectionFailure, ConnectionOptions, HttpTransport, SubscriptionDescriptor,
    SubscriptionManager,
};
use relay_core::{ChannelIdentity, ParamValue};
use relay_settings::RelaySettings;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::warn;

/// Options for one watched channel.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    /// Full endpoint URL.
    pub url: String,
    /// Channel name.
    pub channel: String,
    /// Topics to print.
    pub topics: Vec<String>,
    /// `key=value` request params.
    pub params: Vec<String>,
    /// Bearer token identifying the caller.
    pub token: Option<String>,
}

/// Split `key=value`. Values that parse as JSON scalars keep their type.
pub fn parse_param(raw: &str) -> Result<(String, ParamValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("param `{raw}` is not key=value");
    };
    if key.is_empty() {
        bail!("param `{raw}` has an empty key");
    }
    let parsed = serde_json::from_str::<Value>(value)
        .ok()
        .and_then(|v| ParamValue::from_json(&v))
        .unwrap_or_else(|| ParamValue::from(value));
    Ok((key.to_owned(), parsed))
}

/// Descriptor for `target`.
pub fn descriptor(target: &WatchTarget) -> Result<SubscriptionDescriptor> {
    let identity = ChannelIdentity::new(&target.channel).with_topics(target.topics.iter().cloned());
    let mut descriptor = SubscriptionDescriptor::new(identity);
    for raw in &target.params {
        let (key, value) = parse_param(raw)?;
        descriptor = descriptor.with_param(key, value);
    }
    Ok(descriptor)
}

/// Print health changes and topic messages as JSON lines until ctrl-c.
pub async fn run(settings: &RelaySettings, target: WatchTarget) -> Result<()> {
    if target.topics.is_empty() {
        bail!("at least one --topic is required");
    }

    let mut transport = HttpTransport::new();
    if let Some(token) = &target.token {
        transport = transport.with_bearer(token);
    }
    let options = ConnectionOptions::from(&settings.client).with_on_failure(|f: &ConnectionFailure| {
        warn!(channel = %f.channel_id, status = ?f.status, message = %f.message, "subscription failed");
    });

    let mut manager = SubscriptionManager::new(target.url.clone(), Arc::new(transport), options);
    let _ = manager
        .reconcile(&[descriptor(&target)?])
        .context("failed to subscribe")?;
    let ctx = manager
        .channel(&target.channel)
        .context("channel missing after reconcile")?;

    let mut printers = JoinSet::new();
    let _ = printers.spawn(print_health(ctx.clone()));
    for topic in &target.topics {
        let _ = printers.spawn(print_topic(ctx.clone(), topic.clone()));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    manager.shutdown();
    printers.shutdown().await;
    Ok(())
}

async fn print_health(ctx: ChannelContext) {
    let mut health = ctx.health();
    loop {
        let payload = health.get_and_mark_seen();
        println!("{}", json!({ "channel": ctx.channel_id(), "health": payload }));
        if !health.changed().await {
            return;
        }
    }
}

async fn print_topic(ctx: ChannelContext, topic: String) {
    let mut messages = ctx.topic::<Value>(&topic);
    while messages.changed().await {
        if let Some(data) = messages.current() {
            println!("{}", json!({ "channel": ctx.channel_id(), "topic": topic, "data": data }));
        }
    }
}
