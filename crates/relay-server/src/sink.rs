//! Push transport seam.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::SinkError;

/// One named push event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushEvent {
    /// Event name (`message` or `health`).
    pub event: String,
    /// Serialized payload.
    pub data: String,
}

/// Where the pump writes push events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Push one event. An error means the stream is unusable.
    async fn emit(&self, event: &str, payload: String) -> Result<(), SinkError>;

    /// Resolves once the receiving side has gone away.
    async fn closed(&self);
}

/// [`EventSink`] backed by a bounded mpsc channel.
///
/// The HTTP layer owns the receiver and turns it into an SSE body. Dropping
/// the receiver (client disconnect) closes the sink.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<PushEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PushEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: &str, payload: String) -> Result<(), SinkError> {
        self.tx
            .send(PushEvent {
                event: event.to_string(),
                data: payload,
            })
            .await
            .map_err(|_| SinkError::Closed)
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.emit("health", "a".into()).await.unwrap();
        sink.emit("message", "b".into()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().data, "a");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, "message");
        assert_eq!(second.data, "b");
    }

    #[tokio::test]
    async fn dropped_receiver_closes_sink() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.closed().await;
        assert_eq!(sink.emit("health", "x".into()).await, Err(SinkError::Closed));
    }
}
