//! The staged DNS → TCP → HTTP classifier.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use ninsho_core::{Protocol, Route, RouteStatus, NETWORK_TIMEOUT_CEILING};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

use crate::error::HealthResult;
use crate::report::HealthReport;

const USER_AGENT: &str = concat!("ninsho-health/", env!("CARGO_PKG_VERSION"));

/// Coarse reachability state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    /// Reachable within the slow threshold.
    Up,
    /// Reachable but slow.
    Degraded,
    /// Not usable.
    Down,
    /// Reserved; no branch of the decision tree produces it.
    Unknown,
}

impl HealthState {
    /// Uppercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Degraded => "DEGRADED",
            Self::Down => "DOWN",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which branch of the decision tree matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    /// Answered below 500 within the threshold.
    #[serde(rename = "online")]
    Online,
    /// Answered below 500 after the threshold.
    #[serde(rename = "slow")]
    Slow,
    /// The URL lacked a scheme or host, or did not parse.
    #[serde(rename = "misconfig")]
    Misconfig,
    /// The host did not resolve.
    #[serde(rename = "offline_dns")]
    OfflineDns,
    /// The TCP connection was refused or timed out.
    #[serde(rename = "offline_conn")]
    OfflineConn,
    /// The HTTP round-trip timed out.
    #[serde(rename = "timeout")]
    Timeout,
    /// The backend answered with a 5xx status.
    #[serde(rename = "error_5xx")]
    Error5xx,
    /// Any other failure during the HTTP stage.
    #[serde(rename = "error_exc")]
    ErrorExc,
}

impl Reason {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Slow => "slow",
            Self::Misconfig => "misconfig",
            Self::OfflineDns => "offline_dns",
            Self::OfflineConn => "offline_conn",
            Self::Timeout => "timeout",
            Self::Error5xx => "error_5xx",
            Self::ErrorExc => "error_exc",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Coarse state.
    pub state: HealthState,
    /// Matching branch.
    pub reason: Reason,
    /// Short human-readable account of status and timing.
    pub detail: String,
    /// HTTP status, when a response arrived.
    pub http_status: Option<u16>,
    /// Wall-clock time of the HTTP stage, when it ran.
    pub duration_ms: Option<u64>,
}

impl Classification {
    fn new(state: HealthState, reason: Reason, detail: impl Into<String>) -> Self {
        Self {
            state,
            reason,
            detail: detail.into(),
            http_status: None,
            duration_ms: None,
        }
    }

    fn down(reason: Reason, detail: impl Into<String>) -> Self {
        Self::new(HealthState::Down, reason, detail)
    }

    fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// `UP` and `DEGRADED` count as success.
    pub fn is_success(&self) -> bool {
        matches!(self.state, HealthState::Up | HealthState::Degraded)
    }

    /// Map onto the legacy route status vocabulary.
    pub fn legacy_status(&self) -> RouteStatus {
        match (self.state, self.reason) {
            (HealthState::Up, _) => RouteStatus::Online,
            (HealthState::Degraded, _) => RouteStatus::Slow,
            (HealthState::Down, Reason::Error5xx | Reason::ErrorExc) => RouteStatus::Error,
            (HealthState::Down, Reason::Timeout) => RouteStatus::Timeout,
            (HealthState::Down, _) => RouteStatus::Offline,
            (HealthState::Unknown, _) => RouteStatus::Unknown,
        }
    }
}

/// Per-probe knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Bounds the HTTP stage; the DNS and TCP stages use `min(this, 10s)`.
    pub connect_timeout: Duration,
    /// Responses slower than this are `DEGRADED`.
    pub slow_threshold: Duration,
    /// Verify backend certificates.
    pub verify_tls: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            slow_threshold: Duration::from_millis(2000),
            verify_tls: true,
        }
    }
}

impl ProbeOptions {
    /// Create options from a connect timeout and slow threshold.
    pub fn new(connect_timeout: Duration, slow_threshold_ms: u64) -> Self {
        Self {
            connect_timeout,
            slow_threshold: Duration::from_millis(slow_threshold_ms),
            verify_tls: true,
        }
    }

    /// Set certificate verification.
    #[must_use]
    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Narrow the options for one route: the route's timeout and the
    /// network ceiling cap the connect timeout, and the route's TLS flags
    /// decide verification.
    #[must_use]
    pub fn for_route(&self, route: &Route) -> Self {
        Self {
            connect_timeout: self
                .connect_timeout
                .min(route.timeout())
                .min(NETWORK_TIMEOUT_CEILING),
            slow_threshold: self.slow_threshold,
            verify_tls: route.verify_tls(self.verify_tls),
        }
    }
}

/// Stateless backend classifier.
///
/// Holds two pooled HTTP clients, one verifying certificates and one not,
/// so skipping verification for one route never affects another.
#[derive(Debug, Clone)]
pub struct Classifier {
    verified: Client,
    unverified: Client,
}

impl Classifier {
    /// Create a classifier.
    pub fn new() -> HealthResult<Self> {
        let verified = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .build()?;
        let unverified = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            verified,
            unverified,
        })
    }

    /// One-off client that resolves `name` to `addr`.
    fn pinned_client(name: &str, addr: SocketAddr, verify_tls: bool) -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(!verify_tls)
            .resolve(name, addr)
            .build()
    }

    /// Classify `url` with certificate verification on.
    pub async fn classify(
        &self,
        url: &str,
        connect_timeout: Duration,
        slow_threshold_ms: u64,
    ) -> Classification {
        self.probe(url, &ProbeOptions::new(connect_timeout, slow_threshold_ms))
            .await
    }

    /// Run the decision tree against `url`.
    pub async fn probe(&self, url: &str, options: &ProbeOptions) -> Classification {
        let classification = self.run_stages(url, options, None).await;
        debug!(
            url = %url,
            state = %classification.state,
            reason = %classification.reason,
            detail = %classification.detail,
            "backend classified"
        );
        ninsho_telemetry::metrics::record_health_check(
            classification.state.as_str(),
            classification.reason.as_str(),
        );
        classification
    }

    /// Run the decision tree against a route's base URL.
    ///
    /// When the route carries an SNI name, DNS is skipped: the TCP stage
    /// dials the target address and the HTTP stage resolves the name to it.
    pub async fn probe_route(&self, route: &Route, options: &ProbeOptions) -> Classification {
        let url = probe_url(route);
        let options = options.for_route(route);
        let pin = sni_pin(route);

        let classification = self.run_stages(&url, &options, pin.as_ref()).await;
        debug!(
            route = %route.path,
            url = %url,
            state = %classification.state,
            reason = %classification.reason,
            detail = %classification.detail,
            "backend classified"
        );
        ninsho_telemetry::metrics::record_health_check(
            classification.state.as_str(),
            classification.reason.as_str(),
        );
        classification
    }

    /// Probe a route and shape the result for callers.
    pub async fn check_route(&self, route: &Route, options: &ProbeOptions) -> HealthReport {
        HealthReport::from(&self.probe_route(route, options).await)
    }

    async fn run_stages(
        &self,
        url: &str,
        options: &ProbeOptions,
        pin: Option<&(String, SocketAddr)>,
    ) -> Classification {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return Classification::down(Reason::Misconfig, format!("Invalid URL: {e}")),
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return Classification::down(
                Reason::Misconfig,
                format!("Invalid URL: unsupported scheme '{}'", parsed.scheme()),
            );
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Classification::down(Reason::Misconfig, "Invalid URL: missing host"),
        };

        let Some(port) = parsed.port_or_known_default() else {
            return Classification::down(Reason::Misconfig, "Invalid URL: missing port");
        };

        let budget = options.connect_timeout.min(NETWORK_TIMEOUT_CEILING);

        let addrs = match pin {
            Some((_, addr)) => vec![*addr],
            None => match resolve(&host, port, budget).await {
                Ok(addrs) => addrs,
                Err(detail) => return Classification::down(Reason::OfflineDns, detail),
            },
        };

        if let Err(detail) = tcp_connect(&addrs, budget).await {
            return Classification::down(Reason::OfflineConn, detail);
        }

        self.http_stage(parsed, options, pin).await
    }

    async fn http_stage(
        &self,
        url: Url,
        options: &ProbeOptions,
        pin: Option<&(String, SocketAddr)>,
    ) -> Classification {
        let pinned;
        let client = match pin {
            Some((name, addr)) => match Self::pinned_client(name, *addr, options.verify_tls) {
                Ok(client) => {
                    pinned = client;
                    &pinned
                }
                Err(e) => {
                    return Classification::down(Reason::ErrorExc, format!("HTTP error: {e}"))
                }
            },
            None if options.verify_tls => &self.verified,
            None => &self.unverified,
        };

        let start = Instant::now();
        let result = client
            .get(url)
            .timeout(options.connect_timeout)
            .send()
            .await;
        let elapsed = start.elapsed();
        let ms = millis(elapsed);

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                // Dropping the response releases the connection without
                // reading the body.
                drop(response);

                if status >= 500 {
                    Classification::down(Reason::Error5xx, format!("HTTP {status} in {ms} ms"))
                } else if elapsed > options.slow_threshold {
                    Classification::new(
                        HealthState::Degraded,
                        Reason::Slow,
                        format!(
                            "HTTP {status} in {ms} ms (slower than {} ms)",
                            millis(options.slow_threshold)
                        ),
                    )
                } else {
                    Classification::new(
                        HealthState::Up,
                        Reason::Online,
                        format!("HTTP {status} in {ms} ms"),
                    )
                }
                .with_http_status(status)
                .with_duration(ms)
            }
            Err(e) if e.is_timeout() => Classification::down(
                Reason::Timeout,
                format!("HTTP timeout after {}", human(options.connect_timeout)),
            )
            .with_duration(ms),
            Err(e) => Classification::down(Reason::ErrorExc, format!("HTTP error: {e}"))
                .with_duration(ms),
        }
    }
}

/// HTTPS routes with an `sni` pin that name to the target address.
fn sni_pin(route: &Route) -> Option<(String, SocketAddr)> {
    match (&route.protocol, route.sni.as_deref()) {
        (Protocol::Https, Some(sni)) if !sni.is_empty() => {
            Some((sni.to_string(), route.target_addr()))
        }
        _ => None,
    }
}

/// The URL a route is probed at.
///
/// HTTPS routes with an `sni` use it as the host so certificate validation
/// sees the expected name; the connection still goes to the target address.
pub fn probe_url(route: &Route) -> String {
    let host = match (&route.protocol, route.sni.as_deref()) {
        (Protocol::Https, Some(sni)) if !sni.is_empty() => sni.to_string(),
        _ => match route.target_ip {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{ip}]"),
        },
    };
    format!(
        "{}://{}:{}{}",
        route.protocol, host, route.target_port, route.target_path
    )
}

async fn resolve(host: &str, port: u16, budget: Duration) -> Result<Vec<SocketAddr>, String> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    match tokio::time::timeout(budget, lookup_host((bare, port))).await {
        Ok(Ok(addrs)) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(format!("DNS error: no addresses for {bare}"))
            } else {
                Ok(addrs)
            }
        }
        Ok(Err(e)) => Err(format!("DNS error: {e}")),
        Err(_) => Err(format!("DNS error: lookup timed out after {}", human(budget))),
    }
}

async fn tcp_connect(addrs: &[SocketAddr], budget: Duration) -> Result<(), String> {
    let attempt = async {
        let mut last_error = String::from("no addresses");
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(_stream) => return Ok(()),
                Err(e) => last_error = format!("{addr}: {e}"),
            }
        }
        Err(last_error)
    };

    match tokio::time::timeout(budget, attempt).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("TCP connect failed: {e}")),
        Err(_) => Err(format!("TCP connect failed: timed out after {}", human(budget))),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn human(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
