//! # relay-server
//!
//! Authorization-gated SSE bus endpoint.
//!
//! - **Registry**: static channel entries resolved per request, exactly one
//!   match required ([`ChannelRegistry`])
//! - **Authorization**: topic validation, request-time [`Authorize`], optional
//!   per-message reauthorization ([`Reauthorizer`])
//! - **Stream pump**: one task per open stream, health events, liveness ticks,
//!   idempotent teardown ([`StreamPump`])
//! - **Failure resolver**: optional hook over every user-visible failure message
//! - **HTTP**: axum router with the endpoint, `/health` and `/metrics`,
//!   graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod errors;
pub mod failure;
pub mod health;
pub mod lease;
pub mod metrics;
pub mod pump;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod sink;
pub mod upstream;

pub use auth::{
    Authorize, AuthorizeContext, AuthorizedSession, Reauthorize, Reauthorizer, allow_all,
    authorize_fn, reauthorize_fn,
};
pub use config::{EndpointConfig, LivenessConfig, ServerConfig};
pub use context::RequestContext;
pub use endpoint::BusEndpoint;
pub use errors::{AuthError, Failure, ResolvedFailure, SinkError, UpstreamError};
pub use failure::{FailureHook, FailureResolver};
pub use lease::{StreamLease, StreamRegistry};
pub use pump::{CloseReason, PumpState, StreamPump};
pub use registry::{ChannelRegistry, ParamsResolver, RegistryEntry};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
pub use sink::{ChannelSink, EventSink, PushEvent};
pub use upstream::{EnvelopeStream, InMemoryUpstream, SubscriptionToken, Upstream};
