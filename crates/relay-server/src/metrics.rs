//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Subscription requests total (counter, labels: outcome).
pub const REQUESTS_TOTAL: &str = "relay_requests_total";
/// Streams opened total (counter).
pub const STREAMS_OPENED_TOTAL: &str = "relay_streams_opened_total";
/// Streams closed total (counter, labels: reason).
pub const STREAMS_CLOSED_TOTAL: &str = "relay_streams_closed_total";
/// Open streams (gauge).
pub const STREAMS_ACTIVE: &str = "relay_streams_active";
/// Envelopes forwarded to clients (counter).
pub const MESSAGES_FORWARDED_TOTAL: &str = "relay_messages_forwarded_total";
/// Messages rejected by per-message reauthorization (counter).
pub const REAUTHORIZATION_DENIALS_TOTAL: &str = "relay_reauthorization_denials_total";
/// Liveness ticks emitted (counter).
pub const LIVENESS_TICKS_TOTAL: &str = "relay_liveness_ticks_total";

/// `outcome` label for accepted requests. Rejections use the failure stage.
pub const OUTCOME_ACCEPTED: &str = "accepted";
