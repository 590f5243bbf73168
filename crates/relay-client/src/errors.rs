//! Client error types.

use relay_core::ChannelError;

/// Errors opening or reading a subscription stream.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request never got a response.
    #[error("request failed: {0}")]
    Request(String),
    /// The server answered with a non-2xx status.
    #[error("{status} {status_text}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase.
        status_text: String,
        /// Server-provided error message, or the reason phrase.
        message: String,
    },
    /// Reading the event stream failed.
    #[error("stream read failed: {0}")]
    Stream(String),
}

impl TransportError {
    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Client errors (4xx) will not go away by retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), Some(s) if (400..500).contains(&s))
    }
}

/// Errors raised synchronously by the subscription manager.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Two descriptors resolved to the same channel id.
    #[error("channel {0} is subscribed more than once")]
    DuplicateChannel(String),
    /// A descriptor's channel could not be resolved.
    #[error("failed to resolve channel: {0}")]
    Channel(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            status_text: "X".into(),
            message: "m".into(),
        }
    }

    #[test]
    fn four_xx_is_terminal() {
        assert!(status(400).is_terminal());
        assert!(status(403).is_terminal());
        assert!(!status(500).is_terminal());
        assert!(!TransportError::Request("refused".into()).is_terminal());
    }

    #[test]
    fn status_display() {
        let err = TransportError::Status {
            status: 403,
            status_text: "Forbidden".into(),
            message: "nope".into(),
        };
        assert_eq!(err.to_string(), "403 Forbidden: nope");
    }

    #[test]
    fn duplicate_display() {
        assert_eq!(
            ClientError::DuplicateChannel("user:alice".into()).to_string(),
            "channel user:alice is subscribed more than once"
        );
    }
}
