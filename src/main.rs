//! # relay
//!
//! Relay binary: serves the demo channel registry over the SSE bus endpoint,
//! or watches a channel through the client subscription manager.

#![deny(unsafe_code)]

mod demo;
mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use relay_server::{BusEndpoint, EndpointConfig, InMemoryUpstream, RelayServer, ServerConfig};
use relay_settings::RelaySettings;
use relay_telemetry::{TelemetryConfig, init_telemetry};

use crate::demo::DemoPolicy;
use crate::watch::WatchTarget;

const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 2_000;

/// Authorization-gated publish/subscribe bridge.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Authorization-gated publish/subscribe bridge over server-sent events")]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demo registry (default).
    Serve(ServeArgs),
    /// Subscribe to a channel and print health and messages as JSON lines.
    Watch(WatchArgs),
    /// Print the effective settings as JSON.
    Settings,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Caller allowed to read `admin-message` on the demo channel. Repeatable.
    #[arg(long = "admin")]
    admins: Vec<String>,

    /// Demo publish interval in milliseconds.
    #[arg(long)]
    publish_interval_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Channel name.
    channel: String,

    /// Topic to print. Repeatable.
    #[arg(long = "topic", required = true)]
    topics: Vec<String>,

    /// Request param as `key=value`. Repeatable.
    #[arg(long = "param")]
    params: Vec<String>,

    /// Bearer token identifying the caller.
    #[arg(long)]
    token: Option<String>,

    /// Endpoint URL (defaults to the configured host, port and path).
    #[arg(long)]
    url: Option<String>,
}

fn load(path: Option<&Path>) -> Result<RelaySettings> {
    match path {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => relay_settings::load_settings().context("failed to load settings"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.settings.as_deref())?;
    let _telemetry = init_telemetry(&TelemetryConfig::from_settings(&settings.logging));

    match cli.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(settings, args).await,
        Command::Watch(args) => {
            let url = args.url.unwrap_or_else(|| {
                format!(
                    "http://{}:{}{}",
                    settings.server.host, settings.server.port, settings.server.path
                )
            });
            let target = WatchTarget {
                url,
                channel: args.channel,
                topics: args.topics,
                params: args.params,
                token: args.token,
            };
            watch::run(&settings, target).await
        }
        Command::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn serve(mut settings: RelaySettings, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let metrics = relay_server::metrics::install_recorder()
        .context("failed to install metrics recorder")?;

    let upstream = Arc::new(InMemoryUpstream::new());
    let policy = Arc::new(DemoPolicy::new(args.admins));
    let endpoint = BusEndpoint::new(
        EndpointConfig::from(&settings),
        demo::registry(policy),
        upstream.clone(),
    );
    let server = RelayServer::new(ServerConfig::from(&settings), endpoint).with_metrics(metrics);
    let shutdown = server.shutdown().clone();

    let (addr, handle) = server.spawn().await.with_context(|| {
        format!("failed to bind {}:{}", settings.server.host, settings.server.port)
    })?;

    let interval = Duration::from_millis(
        args.publish_interval_ms
            .unwrap_or(DEFAULT_PUBLISH_INTERVAL_MS)
            .max(1),
    );
    let publisher = tokio::spawn(demo::run_publisher(upstream, interval, shutdown.token()));

    tracing::info!(%addr, path = %settings.server.path, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    shutdown.shutdown();
    handle.await.context("server task panicked")??;
    let _ = publisher.await;
    tracing::info!("shutdown complete");
    Ok(())
}
