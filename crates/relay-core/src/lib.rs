//! # relay-core
//!
//! Shared vocabulary for the relay bridge. Both the server endpoint and the
//! client subscription manager depend on these types:
//!
//! - **Channels**: [`ChannelIdentity`] (name + topic set) and [`ChannelSpec`],
//!   either a static identity or a factory taking an optional parameter
//! - **Requests**: [`SubscriptionRequest`] and its normalizer, [`ParamValue`]
//! - **Authorization**: [`AuthorizationOutcome`] with subset intersection rules
//! - **Stream payloads**: [`TopicEnvelope`] (opaque passthrough) and [`HealthPayload`]
//! - **Failures**: [`FailureStage`] and [`FailureContext`] fed to the failure resolver

#![deny(unsafe_code)]

pub mod channel;
pub mod envelope;
pub mod failure;
pub mod health;
pub mod outcome;
pub mod request;

pub use channel::{ChannelError, ChannelFactory, ChannelIdentity, ChannelSpec};
pub use envelope::TopicEnvelope;
pub use failure::{FailureContext, FailureStage};
pub use health::{HealthPayload, HealthStatus};
pub use outcome::AuthorizationOutcome;
pub use request::{ParamValue, Params, RequestError, SubscriptionRequest};

/// Push event name carrying a serialized [`TopicEnvelope`].
pub const MESSAGE_EVENT: &str = "message";
/// Push event name carrying a serialized [`HealthPayload`].
pub const HEALTH_EVENT: &str = "health";
