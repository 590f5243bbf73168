//! Error types for the bus endpoint and its collaborators.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use relay_core::{FailureContext, FailureStage};
use serde::Serialize;

/// Error raised by an authorization callback.
///
/// The message is surfaced to the client (unless the failure hook overrides
/// it), so keep it free of secrets.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthError {
    /// Human-readable reason.
    pub message: String,
}

impl AuthError {
    /// Build from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from the upstream publishing system.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Token issuance was refused.
    #[error("failed to issue subscription token: {0}")]
    Token(String),
    /// The token is unknown or already cancelled.
    #[error("unknown subscription token: {0}")]
    UnknownToken(String),
    /// Subscribing with a valid token failed.
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
    /// The subscriber fell behind and messages were dropped.
    #[error("subscriber lagged, {0} messages dropped")]
    Lagged(u64),
    /// Any other read-time failure.
    #[error("upstream read failed: {0}")]
    Read(String),
}

/// Errors from the push transport.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The client side of the stream is gone.
    #[error("push stream closed")]
    Closed,
    /// The payload could not be serialized.
    #[error("failed to encode push payload: {0}")]
    Encode(String),
}

/// A request-time failure before it has been through the failure resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// HTTP status to respond with.
    pub status: StatusCode,
    /// Structured context handed to the resolver.
    pub context: FailureContext,
}

impl Failure {
    /// New failure with a default message.
    pub fn new(stage: FailureStage, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            context: FailureContext::new(stage, message).with_status(status.as_u16()),
        }
    }

    /// 400 `request-validation`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(FailureStage::RequestValidation, StatusCode::BAD_REQUEST, message)
    }

    /// Apply a builder to the context.
    #[must_use]
    pub fn map_context(mut self, f: impl FnOnce(FailureContext) -> FailureContext) -> Self {
        self.context = f(self.context);
        self
    }

    /// Stage shorthand.
    pub fn stage(&self) -> FailureStage {
        self.context.stage
    }
}

/// A failure with its final message, ready to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFailure {
    /// HTTP status.
    pub status: StatusCode,
    /// Lifecycle stage.
    pub stage: FailureStage,
    /// Message after the override hook.
    pub message: String,
}

/// JSON body of a request-time failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Final message.
    pub error: String,
    /// Lifecycle stage.
    pub stage: FailureStage,
}

impl IntoResponse for ResolvedFailure {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            stage: self.stage,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_status_in_context() {
        let failure = Failure::new(
            FailureStage::Authorization,
            StatusCode::FORBIDDEN,
            "Forbidden",
        );
        assert_eq!(failure.context.status, Some(403));
        assert_eq!(failure.stage(), FailureStage::Authorization);
    }

    #[test]
    fn map_context_applies_builder() {
        let failure = Failure::bad_request("bad").map_context(|c| c.with_channel("demo"));
        assert_eq!(failure.context.channel.as_deref(), Some("demo"));
        assert_eq!(failure.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resolved_failure_response_shape() {
        let resolved = ResolvedFailure {
            status: StatusCode::FORBIDDEN,
            stage: FailureStage::Authorization,
            message: "Forbidden".into(),
        };
        let resp = resolved.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "Forbidden");
        assert_eq!(parsed["stage"], "authorization");
    }

    #[test]
    fn upstream_error_display() {
        assert_eq!(
            UpstreamError::Lagged(3).to_string(),
            "subscriber lagged, 3 messages dropped"
        );
    }
}
