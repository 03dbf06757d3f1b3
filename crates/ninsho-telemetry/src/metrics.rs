//! Prometheus metrics for ninsho.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `ninsho_relay_requests_total` | Counter | `route`, `status` |
//! | `ninsho_relay_request_duration_seconds` | Histogram | `route` |
//! | `ninsho_health_checks_total` | Counter | `state`, `reason` |
//! | `ninsho_caddy_sync_total` | Counter | `outcome` |
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::TelemetryError;
use crate::TelemetryResult;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const RELAY_REQUESTS: &str = "ninsho_relay_requests_total";
const RELAY_DURATION: &str = "ninsho_relay_request_duration_seconds";
const HEALTH_CHECKS: &str = "ninsho_health_checks_total";
const CADDY_SYNC: &str = "ninsho_caddy_sync_total";

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,

    /// Optional standalone exporter address, e.g. `0.0.0.0:9090`.
    ///
    /// Without it, metrics are only reachable through [`render_metrics`].
    pub addr: Option<String>,

    /// Buckets for the relay duration histogram, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: None,
            duration_buckets: vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        }
    }
}

/// Installs the Prometheus recorder.
///
/// When `addr` is set a standalone exporter is spawned on the current tokio
/// runtime as well.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the address is invalid or a recorder is
/// already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(RELAY_DURATION.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            let (recorder, exporter) = builder
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    warn!(error = ?e, "metrics exporter stopped");
                }
            });
            info!(addr = %addr, "metrics exporter listening");
            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(RELAY_REQUESTS, "Requests forwarded by the relay");
    describe_histogram!(RELAY_DURATION, "Relay time to response headers in seconds");
    describe_counter!(HEALTH_CHECKS, "Backend health classifications");
    describe_counter!(CADDY_SYNC, "Edge-proxy configuration pushes by outcome");
}

/// Records one relayed request.
///
/// `route` is the mount path, never the full request path, to keep label
/// cardinality bounded.
pub fn record_relay_request(route: &str, status_code: u16, duration: Duration) {
    counter!(
        RELAY_REQUESTS,
        "route" => route.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(RELAY_DURATION, "route" => route.to_string()).record(duration.as_secs_f64());
}

/// Records one health classification.
pub fn record_health_check(state: &'static str, reason: &'static str) {
    counter!(HEALTH_CHECKS, "state" => state, "reason" => reason).increment(1);
}

/// Records one configuration push.
pub fn record_caddy_sync(outcome: &'static str) {
    counter!(CADDY_SYNC, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.addr.is_none());
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_addr_rejected() {
        let config = MetricsConfig {
            addr: Some("not an address".to_string()),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_relay_request("/jellyfin", 200, Duration::from_millis(12));
        record_health_check("UP", "online");
        record_caddy_sync("patched");
    }
}
