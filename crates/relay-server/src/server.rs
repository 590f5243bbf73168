//! `RelayServer`: HTTP listener hosting the bus endpoint, `/health` and
//! `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::endpoint::BusEndpoint;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from the health and metrics handlers.
#[derive(Clone)]
pub struct AppState {
    /// The bus endpoint.
    pub endpoint: Arc<BusEndpoint>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay HTTP server.
pub struct RelayServer {
    config: ServerConfig,
    endpoint: Arc<BusEndpoint>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server around `endpoint`.
    ///
    /// The endpoint's pumps are tied to this server's shutdown coordinator.
    pub fn new(config: ServerConfig, endpoint: BusEndpoint) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let endpoint = endpoint.with_shutdown(shutdown.token());
        Self {
            config,
            endpoint: Arc::new(endpoint),
            shutdown,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            endpoint: self.endpoint.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .merge(self.endpoint.clone().router())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind((self.config.host.as_str(), self.config.port)).await
    }

    /// Serve on `listener` until shutdown, then wait for open streams.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, path = %self.endpoint.config().path, "relay server listening");

        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        let _ = self
            .shutdown
            .graceful_shutdown(self.endpoint.tasks(), Some(self.config.shutdown_timeout))
            .await;
        info!("relay server stopped");
        Ok(())
    }

    /// Bind, then serve in a background task. Returns the bound address.
    pub async fn spawn(self) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<std::io::Result<()>>)> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move { self.serve(listener).await });
        Ok((addr, handle))
    }

    /// The bus endpoint.
    pub fn endpoint(&self) -> &Arc<BusEndpoint> {
        &self.endpoint
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.endpoint.streams().active(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::allow_all;
    use crate::config::EndpointConfig;
    use crate::registry::{ChannelRegistry, RegistryEntry};
    use crate::upstream::InMemoryUpstream;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use relay_core::ChannelIdentity;
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        let registry = ChannelRegistry::new().with_entry(RegistryEntry::new(
            "demo",
            ChannelIdentity::new("demo").with_topic("message"),
            allow_all(),
        ));
        let endpoint = BusEndpoint::new(
            EndpointConfig::default(),
            registry,
            Arc::new(InMemoryUpstream::new()),
        );
        RelayServer::new(ServerConfig::default(), endpoint)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["active_streams"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn endpoint_is_mounted_on_configured_path() {
        let server = make_server();
        let req = Request::builder()
            .method("POST")
            .uri("/api/realtime")
            .body(Body::from(r#"{"channel":"missing"}"#))
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_on_endpoint_is_405() {
        let server = make_server();
        let req = Request::builder().uri("/api/realtime").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn shutdown_stops_serving() {
        let server = make_server();
        let shutdown = server.shutdown().clone();
        let (addr, handle) = server.spawn().await.unwrap();
        assert_ne!(addr.port(), 0);

        shutdown.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn health_reports_shutting_down() {
        let server = make_server();
        server.shutdown().shutdown();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "shutting_down");
    }
}
