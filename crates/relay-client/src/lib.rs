//! # relay-client
//!
//! Client side of the relay bridge.
//!
//! - **Manager**: [`SubscriptionManager`] reconciles a declarative list of
//!   [`SubscriptionDescriptor`]s into one live connection per channel id,
//!   reconnecting only when a connection's [`Signature`] changes
//! - **Context store**: each live channel exposes a [`ChannelContext`] with a
//!   subscribable health value and a latest-message-per-topic store
//! - **Transport**: [`HttpTransport`] POSTs the subscription and parses the
//!   server-sent event stream; the [`Transport`] trait is the seam for tests

#![deny(unsafe_code)]

pub mod cell;
pub mod connection;
pub mod context;
pub mod descriptor;
pub mod errors;
pub mod manager;
pub mod sse;
pub mod transport;

pub use cell::{CellReader, ObservableCell};
pub use connection::{CONNECTION_CLOSED, ConnectionFailure, ConnectionOptions, FailureCallback};
pub use context::{ChannelContext, RecoveryHook, TopicStore, TopicSubscription};
pub use descriptor::{ResolvedSubscription, Signature, SubscriptionDescriptor};
pub use errors::{ClientError, TransportError};
pub use manager::{ChannelMap, ReconcileReport, SubscriptionManager};
pub use sse::{SseEvent, parse_sse_events};
pub use transport::{EventStream, HttpTransport, Transport};
