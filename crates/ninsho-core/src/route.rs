//! The `Route` value type.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::validate;

/// Upper bound on the relay connect timeout, in seconds.
const MAX_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Backend scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// The URL scheme.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// The port implied when a URL omits one.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate::parse_protocol(s)
    }
}

/// Last known health of a route, in the legacy string vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    /// Never checked.
    #[default]
    Unknown,
    /// Reachable and fast.
    Online,
    /// Reachable but slower than the threshold.
    Slow,
    /// Answered with 5xx, or the probe failed unexpectedly.
    Error,
    /// The HTTP round-trip timed out.
    Timeout,
    /// DNS, TCP or URL failure.
    Offline,
}

impl RouteStatus {
    /// The legacy status string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Slow => "slow",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mount path mapped to a backend plus forwarding options.
///
/// Routes are values: the core reads them from a
/// [`RouteStore`](crate::RouteStore) snapshot and never mutates them except
/// for `status`/`last_check`, which only the health path writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Opaque unique identifier, immutable after creation.
    pub id: String,
    /// Mount path at the edge (`/name`).
    pub path: String,
    /// Display label.
    pub name: String,
    /// Private backend address.
    pub target_ip: IpAddr,
    /// Backend port.
    pub target_port: u16,
    /// Path prefix on the backend side.
    #[serde(default = "default_target_path")]
    pub target_path: String,
    /// Backend scheme.
    #[serde(default)]
    pub protocol: Protocol,
    /// Disabled routes never receive traffic.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opt-in to periodic probing.
    #[serde(default = "default_true")]
    pub health_check: bool,
    /// Relay and probe timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Forward the inbound `Host` instead of the backend's.
    #[serde(default)]
    pub preserve_host: bool,
    /// Informational; upgrades stream through the relay unchanged.
    #[serde(default)]
    pub websocket: bool,
    /// Last known health.
    #[serde(default)]
    pub status: RouteStatus,
    /// When `status` was last written.
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
    /// TLS server name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    /// Skip backend certificate verification (https only).
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Explicit verification override; wins over `insecure_skip_verify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_tls: Option<bool>,
    /// Ask the backend for identity encoding at the edge.
    #[serde(default = "default_true")]
    pub no_upstream_compression: bool,
    /// Force a response `Content-Encoding` at the edge (`gzip`, `br`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_content_encoding: Option<String>,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last whole-field update.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_target_path() -> String {
    "/".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_timeout() -> u64 {
    30
}

impl Route {
    /// Start building a route.
    pub fn builder(
        path: impl Into<String>,
        name: impl Into<String>,
        target_ip: IpAddr,
        target_port: u16,
    ) -> RouteBuilder {
        RouteBuilder::new(path, name, target_ip, target_port)
    }

    /// Validate every field.
    pub fn validate(&self) -> CoreResult<()> {
        let normalized = validate::normalize_path(&self.path)?;
        if normalized != self.path {
            return Err(CoreError::validation(
                "path",
                format!("Path must be normalized (expected '{normalized}')"),
            ));
        }
        validate::validate_name(&self.name)?;
        validate::validate_target_ip(self.target_ip)?;
        validate::validate_port(u32::from(self.target_port))?;
        validate::validate_timeout(self.timeout)?;
        if !self.target_path.starts_with('/') {
            return Err(CoreError::validation(
                "target_path",
                "Target path must start with '/'",
            ));
        }
        Ok(())
    }

    /// Backend socket address.
    pub fn target_addr(&self) -> SocketAddr {
        SocketAddr::new(self.target_ip, self.target_port)
    }

    /// `scheme://ip:port` with IPv6 addresses bracketed.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.protocol, self.target_addr())
    }

    /// `host:port` as dialed by the edge proxy.
    pub fn dial_address(&self) -> String {
        self.target_addr().to_string()
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Connect timeout: `min(5, timeout)` seconds.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.min(MAX_CONNECT_TIMEOUT_SECS))
    }

    /// Whether backend certificates should be verified.
    ///
    /// `verify_tls` wins when set; otherwise `insecure_skip_verify` disables
    /// verification; otherwise `default` applies. Plain HTTP always reports
    /// `default` since no TLS is involved.
    pub fn verify_tls(&self, default: bool) -> bool {
        if self.protocol != Protocol::Https {
            return default;
        }
        if let Some(explicit) = self.verify_tls {
            return explicit;
        }
        if self.insecure_skip_verify {
            return false;
        }
        default
    }

    /// Return a copy with a new health status.
    #[must_use]
    pub fn with_status(mut self, status: RouteStatus, at: DateTime<Utc>) -> Self {
        self.status = status;
        self.last_check = Some(at);
        self
    }
}

/// Builder for [`Route`].
#[derive(Debug, Clone)]
pub struct RouteBuilder {
    route: Route,
}

impl RouteBuilder {
    /// Create a builder with the usual defaults (enabled, health-checked,
    /// 30 s timeout, plain HTTP, backend path `/`).
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        target_ip: IpAddr,
        target_port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            route: Route {
                id: Uuid::now_v7().to_string(),
                path: path.into(),
                name: name.into(),
                target_ip,
                target_port,
                target_path: default_target_path(),
                protocol: Protocol::Http,
                enabled: true,
                health_check: true,
                timeout: default_timeout(),
                preserve_host: false,
                websocket: false,
                status: RouteStatus::Unknown,
                last_check: None,
                sni: None,
                insecure_skip_verify: false,
                verify_tls: None,
                no_upstream_compression: true,
                force_content_encoding: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Set the route ID.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.route.id = id.into();
        self
    }

    /// Set the backend path prefix.
    #[must_use]
    pub fn target_path(mut self, target_path: impl AsRef<str>) -> Self {
        self.route.target_path = validate::normalize_target_path(target_path.as_ref());
        self
    }

    /// Set the backend scheme.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.route.protocol = protocol;
        self
    }

    /// Enable or disable the route.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.route.enabled = enabled;
        self
    }

    /// Opt in or out of periodic probing.
    #[must_use]
    pub fn health_check(mut self, health_check: bool) -> Self {
        self.route.health_check = health_check;
        self
    }

    /// Set the timeout in seconds.
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.route.timeout = secs;
        self
    }

    /// Forward the inbound `Host` header.
    #[must_use]
    pub fn preserve_host(mut self, preserve: bool) -> Self {
        self.route.preserve_host = preserve;
        self
    }

    /// Mark the route as carrying WebSocket traffic.
    #[must_use]
    pub fn websocket(mut self, websocket: bool) -> Self {
        self.route.websocket = websocket;
        self
    }

    /// Set the TLS server name.
    #[must_use]
    pub fn sni(mut self, sni: impl Into<String>) -> Self {
        self.route.sni = Some(sni.into());
        self
    }

    /// Skip backend certificate verification.
    #[must_use]
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.route.insecure_skip_verify = skip;
        self
    }

    /// Explicitly force verification on or off.
    #[must_use]
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.route.verify_tls = Some(verify);
        self
    }

    /// Toggle `Accept-Encoding: identity` at the edge.
    #[must_use]
    pub fn no_upstream_compression(mut self, enabled: bool) -> Self {
        self.route.no_upstream_compression = enabled;
        self
    }

    /// Force a response `Content-Encoding` at the edge.
    #[must_use]
    pub fn force_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.route.force_content_encoding = Some(encoding.into());
        self
    }

    /// Normalize the path and name, then validate.
    pub fn build(mut self) -> CoreResult<Route> {
        self.route.path = validate::normalize_path(&self.route.path)?;
        self.route.name = validate::validate_name(&self.route.name)?;
        self.route.validate()?;
        Ok(self.route)
    }
}

/// A whole-field update.
///
/// Each `Some` field replaces the corresponding route field. [`apply`](Self::apply)
/// either returns a fully validated new route or an error; the original is
/// never partially modified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteUpdate {
    /// New mount path.
    pub path: Option<String>,
    /// New display name.
    pub name: Option<String>,
    /// New backend address.
    pub target_ip: Option<IpAddr>,
    /// New backend port.
    pub target_port: Option<u32>,
    /// New backend path prefix.
    pub target_path: Option<String>,
    /// New scheme.
    pub protocol: Option<Protocol>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New health-check flag.
    pub health_check: Option<bool>,
    /// New timeout.
    pub timeout: Option<u64>,
    /// New preserve-host flag.
    pub preserve_host: Option<bool>,
    /// New websocket flag.
    pub websocket: Option<bool>,
}

impl RouteUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Produce the updated route.
    pub fn apply(&self, route: &Route, now: DateTime<Utc>) -> CoreResult<Route> {
        let mut next = route.clone();

        if let Some(ref path) = self.path {
            next.path = validate::normalize_path(path)?;
        }
        if let Some(ref name) = self.name {
            next.name = validate::validate_name(name)?;
        }
        if let Some(ip) = self.target_ip {
            validate::validate_target_ip(ip)?;
            next.target_ip = ip;
        }
        if let Some(port) = self.target_port {
            next.target_port = validate::validate_port(port)?;
        }
        if let Some(ref target_path) = self.target_path {
            next.target_path = validate::normalize_target_path(target_path);
        }
        if let Some(protocol) = self.protocol {
            next.protocol = protocol;
        }
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(health_check) = self.health_check {
            next.health_check = health_check;
        }
        if let Some(timeout) = self.timeout {
            next.timeout = validate::validate_timeout(timeout)?;
        }
        if let Some(preserve_host) = self.preserve_host {
            next.preserve_host = preserve_host;
        }
        if let Some(websocket) = self.websocket {
            next.websocket = websocket;
        }

        next.updated_at = now;
        Ok(next)
    }
}
