//! Transport seam: open one server-sent event stream per subscription.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use relay_core::SubscriptionRequest;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::debug;

use crate::errors::TransportError;
use crate::sse::{SseEvent, parse_sse_events};

/// Parsed events of one open stream.
pub type EventStream = BoxStream<'static, Result<SseEvent, TransportError>>;

/// Opens subscription streams. Each call yields an independent stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `request` to `endpoint` and return its event stream.
    async fn open(
        &self,
        endpoint: &str,
        request: &SubscriptionRequest,
    ) -> Result<EventStream, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
    headers: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpTransport {
    /// Transport with a fresh client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            headers: Vec::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` on every request.
    #[must_use]
    pub fn with_bearer(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.with_header(AUTHORIZATION.as_str(), value)
    }

    /// Send an extra header on every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(
        &self,
        endpoint: &str,
        request: &SubscriptionRequest,
    ) -> Result<EventStream, TransportError> {
        let mut builder = self
            .client
            .post(endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or_default().to_owned();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| status_text.clone());
            return Err(TransportError::Status {
                status: status.as_u16(),
                status_text,
                message,
            });
        }

        debug!(channel = %request.channel, %status, "subscription stream opened");
        Ok(parse_sse_events(response.bytes_stream()).boxed())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, VecDeque};

    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;

    pub(crate) type Feed = mpsc::UnboundedSender<Result<SseEvent, TransportError>>;

    /// Scripted transport: queued errors first, then a fresh feed per open.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        opens: Mutex<Vec<SubscriptionRequest>>,
        errors: Mutex<VecDeque<TransportError>>,
        feeds: Mutex<HashMap<String, Feed>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn push_error(&self, err: TransportError) {
            self.errors.lock().push_back(err);
        }

        pub(crate) fn opens(&self) -> Vec<SubscriptionRequest> {
            self.opens.lock().clone()
        }

        /// Sender for the most recent stream opened on `channel`.
        pub(crate) fn feed(&self, channel: &str) -> Option<Feed> {
            self.feeds.lock().get(channel).cloned()
        }

        /// End every open stream.
        pub(crate) fn close_feeds(&self) {
            self.feeds.lock().clear();
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(
            &self,
            _endpoint: &str,
            request: &SubscriptionRequest,
        ) -> Result<EventStream, TransportError> {
            self.opens.lock().push(request.clone());
            if let Some(err) = self.errors.lock().pop_front() {
                return Err(err);
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = self.feeds.lock().insert(request.channel.clone(), tx);
            Ok(UnboundedReceiverStream::new(rx).boxed())
        }
    }
}
