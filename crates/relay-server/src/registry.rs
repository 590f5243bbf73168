//! Channel registry and per-request resolution.
//!
//! The registry is built once at startup and never mutated. Each request
//! resolves every entry's channel identity afresh (factories may depend on
//! the caller or the request params) and expects exactly one entry to match
//! the requested channel name.

use std::sync::Arc;

use axum::http::StatusCode;
use relay_core::{ChannelError, ChannelIdentity, ChannelSpec, FailureStage, Params, SubscriptionRequest};
use tracing::error;

use crate::auth::{Authorize, Reauthorize};
use crate::context::RequestContext;
use crate::errors::Failure;

/// Derives a factory channel's parameter from the request.
///
/// Arguments are the caller context, the channel name the client asked for,
/// and the request params.
pub type ParamsResolver =
    Arc<dyn Fn(&RequestContext, &str, &Params) -> Result<String, ChannelError> + Send + Sync>;

/// One configured channel.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Unique key, used in diagnostics.
    pub key: String,
    /// Static identity or factory.
    pub spec: ChannelSpec,
    /// Parameter source for factory specs. Factories without one get `None`.
    pub params_resolver: Option<ParamsResolver>,
    /// Overrides the endpoint default when set.
    pub reauthorize_on_each_message: Option<bool>,
    /// Request-time authorization.
    pub authorize: Arc<dyn Authorize>,
    /// Dedicated per-message callback. `authorize` is reused when absent.
    pub reauthorize: Option<Arc<dyn Reauthorize>>,
}

impl RegistryEntry {
    /// Entry with no resolver, no reauthorization override and no
    /// dedicated reauthorize callback.
    pub fn new(key: impl Into<String>, spec: impl Into<ChannelSpec>, authorize: Arc<dyn Authorize>) -> Self {
        Self {
            key: key.into(),
            spec: spec.into(),
            params_resolver: None,
            reauthorize_on_each_message: None,
            authorize,
            reauthorize: None,
        }
    }

    /// Set the params resolver.
    #[must_use]
    pub fn with_params_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&RequestContext, &str, &Params) -> Result<String, ChannelError> + Send + Sync + 'static,
    {
        self.params_resolver = Some(Arc::new(resolver));
        self
    }

    /// Override per-message reauthorization for this channel.
    #[must_use]
    pub fn reauthorize_on_each_message(mut self, enabled: bool) -> Self {
        self.reauthorize_on_each_message = Some(enabled);
        self
    }

    /// Set a dedicated reauthorize callback.
    #[must_use]
    pub fn with_reauthorize(mut self, reauthorize: Arc<dyn Reauthorize>) -> Self {
        self.reauthorize = Some(reauthorize);
        self
    }

    /// Effective reauthorization flag given the endpoint default.
    pub fn reauthorizes(&self, endpoint_default: bool) -> bool {
        self.reauthorize_on_each_message.unwrap_or(endpoint_default)
    }

    /// Resolve this entry's channel for one request.
    pub fn resolve_channel(
        &self,
        ctx: &RequestContext,
        request: &SubscriptionRequest,
    ) -> Result<ChannelIdentity, ChannelError> {
        let param = match (&self.spec, &self.params_resolver) {
            (ChannelSpec::Factory(_), Some(resolver)) => {
                Some(resolver(ctx, &request.channel, &request.params)?)
            }
            _ => None,
        };
        self.spec.resolve(param.as_deref())
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("key", &self.key)
            .field("spec", &self.spec)
            .field("params_resolver", &self.params_resolver.is_some())
            .field("reauthorize_on_each_message", &self.reauthorize_on_each_message)
            .field("reauthorize", &self.reauthorize.is_some())
            .finish_non_exhaustive()
    }
}

/// A matched entry and the channel it resolved to.
#[derive(Clone, Debug)]
pub struct Resolved {
    /// Matching entry.
    pub entry: Arc<RegistryEntry>,
    /// Channel for this request.
    pub channel: ChannelIdentity,
}

/// Immutable set of registry entries.
#[derive(Clone, Debug, Default)]
pub struct ChannelRegistry {
    entries: Vec<Arc<RegistryEntry>>,
}

impl ChannelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    #[must_use]
    pub fn with_entry(mut self, entry: RegistryEntry) -> Self {
        self.entries.push(Arc::new(entry));
        self
    }

    /// Registered keys, in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the one entry serving `request.channel`.
    ///
    /// - no match: 400
    /// - more than one match: 500, listing every matching key
    /// - an entry that fails to resolve: 500, scan stops there
    pub fn resolve(
        &self,
        ctx: &RequestContext,
        request: &SubscriptionRequest,
    ) -> Result<Resolved, Failure> {
        let mut matches: Vec<Resolved> = Vec::new();

        for entry in &self.entries {
            let channel = entry.resolve_channel(ctx, request).map_err(|e| {
                error!(registry_keys = ?[&entry.key], channel = %request.channel, error = %e, "channel entry failed to resolve");
                Failure::new(
                    FailureStage::ChannelResolution,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to resolve channel",
                )
                .map_context(|c| {
                    c.with_channel(&request.channel)
                        .with_registry_keys([entry.key.as_str()])
                        .with_cause(e.to_string())
                })
            })?;
            if channel.name == request.channel {
                matches.push(Resolved {
                    entry: entry.clone(),
                    channel,
                });
            }
        }

        match matches.len() {
            0 => Err(Failure::new(
                FailureStage::ChannelResolution,
                StatusCode::BAD_REQUEST,
                "Requested channel is not available",
            )
            .map_context(|c| c.with_channel(&request.channel))),
            1 => Ok(matches.remove(0)),
            _ => {
                let keys: Vec<String> = matches.iter().map(|m| m.entry.key.clone()).collect();
                error!(registry_keys = ?keys, channel = %request.channel, "channel registry is ambiguous");
                Err(Failure::new(
                    FailureStage::ChannelResolution,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Channel registry is ambiguous",
                )
                .map_context(|c| c.with_channel(&request.channel).with_registry_keys(keys)))
            }
        }
    }
}
