//! Configuration for the ninsho binary.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use ninsho_caddy::SynthesizerConfig;
use ninsho_core::validate::parse_bool;
use ninsho_health::{ProbeOptions, SweepConfig};
use ninsho_relay::RelayConfig;
use ninsho_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener and deployment mode.
    pub server: ServerSettings,
    /// Caddy synchronization.
    pub caddy: CaddySettings,
    /// Periodic health checks.
    pub health: HealthSettings,
    /// Data-plane relay.
    pub relay: RelaySettings,
    /// Logging and metrics.
    pub telemetry: TelemetrySettings,
}

impl ServerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load configuration from a TOML or JSON file.
    pub fn from_file(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ServerError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid JSON: {e}"))),
            _ => Err(ServerError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply `NINSHO_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = lookup("NINSHO_LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.server.listen_port = port;
        }

        if let Some(mode) = lookup("NINSHO_MODE").and_then(|v| Mode::parse(&v)) {
            self.server.mode = mode;
        }

        if let Some(path) = lookup("NINSHO_ROUTES_FILE") {
            self.server.routes_file = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("NINSHO_CADDY_ADMIN") {
            self.caddy.admin_url = url;
        }

        if let Some(port) = lookup("NINSHO_EDGE_PORT").and_then(|v| v.parse().ok()) {
            self.caddy.listen_port = port;
        }

        if let Some(enabled) = lookup("NINSHO_HEALTH_CHECK_ENABLED") {
            self.health.enabled = parse_bool(&enabled);
        }

        if let Some(interval) =
            lookup("NINSHO_HEALTH_CHECK_INTERVAL").and_then(|v| humantime_serde::parse_duration(&v).ok())
        {
            self.health.interval = interval;
        }

        if let Some(verify) = lookup("NINSHO_UPSTREAM_SSL_VERIFY") {
            self.relay.verify_tls = parse_bool(&verify);
        }

        if let Some(level) = lookup("NINSHO_LOG_LEVEL") {
            self.telemetry.log_level = level;
        }

        if let Some(addr) = lookup("NINSHO_METRICS_ADDR") {
            self.telemetry.metrics_addr = Some(addr).filter(|a| !a.is_empty());
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ServerResult<()> {
        self.listen_ip()?;

        if !self.caddy.admin_url.starts_with("http://")
            && !self.caddy.admin_url.starts_with("https://")
        {
            return Err(ServerError::config(
                "caddy.admin_url must start with http:// or https://",
            ));
        }

        if self.caddy.server_name.is_empty() || self.caddy.server_name.contains('/') {
            return Err(ServerError::config(
                "caddy.server_name must be a non-empty name without '/'",
            ));
        }

        if !self.caddy.disabled_page.starts_with('/') {
            return Err(ServerError::config("caddy.disabled_page must start with '/'"));
        }

        if self.caddy.portal_upstream.is_empty() {
            return Err(ServerError::config("caddy.portal_upstream is required"));
        }

        if self.health.concurrency == 0 {
            return Err(ServerError::config("health.concurrency must be at least 1"));
        }

        if self.health.http_timeout.is_zero() {
            return Err(ServerError::config("health.http_timeout must be positive"));
        }

        if self.relay.via.trim().is_empty() {
            return Err(ServerError::config("relay.via must not be empty"));
        }

        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_ip(&self) -> ServerResult<IpAddr> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e| ServerError::config(format!("invalid listen address: {e}")))
    }

    /// Probe settings shared by the sweep and manual tests.
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions::new(self.health.http_timeout, self.health.slow_threshold_ms)
    }

    /// Settings for the Caddy synthesizer.
    pub fn synthesizer_config(&self) -> SynthesizerConfig {
        SynthesizerConfig {
            admin_url: self.caddy.admin_url.clone(),
            server_name: self.caddy.server_name.clone(),
            listen_port: self.caddy.listen_port,
            portal_upstream: self.caddy.portal_upstream.clone(),
            disabled_page: self.caddy.disabled_page.clone(),
            request_timeout: self.caddy.request_timeout,
            no_upstream_compression: self.caddy.no_upstream_compression,
            force_content_encoding: self.caddy.force_content_encoding.clone(),
            probe: self.probe_options(),
            ..SynthesizerConfig::default()
        }
    }

    /// Settings for the health sweep.
    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig::new()
            .with_interval(self.health.interval)
            .with_probe(self.probe_options())
            .with_concurrency(self.health.concurrency)
    }

    /// Settings for the relay.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            verify_tls: self.relay.verify_tls,
            pool_max_idle_per_host: self.relay.pool_max_idle_per_host,
            via: self.relay.via.clone(),
            ..RelayConfig::default()
        }
    }

    /// Settings for logging and metrics.
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let logging = LogConfig::production()
            .with_level(self.telemetry.log_level.clone())
            .with_json(self.telemetry.json_logs);
        TelemetryConfig {
            logging,
            metrics: MetricsConfig {
                enabled: self.telemetry.metrics_enabled,
                addr: self.telemetry.metrics_addr.clone(),
                ..MetricsConfig::default()
            },
        }
    }
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// ninsho relays traffic itself; Caddy is not used.
    Relay,
    /// Caddy owns the data path; ninsho only pushes its configuration.
    #[default]
    Control,
}

impl Mode {
    /// Parse `relay` or `control`, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "relay" => Some(Self::Relay),
            "control" => Some(Self::Control),
            _ => None,
        }
    }

    /// Mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Control => "control",
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port to listen on.
    pub listen_port: u16,
    /// Deployment mode.
    pub mode: Mode,
    /// JSON file the route store is seeded from.
    pub routes_file: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8000,
            mode: Mode::Control,
            routes_file: None,
        }
    }
}

/// Caddy synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaddySettings {
    /// Admin API base URL.
    pub admin_url: String,
    /// Caddy server whose routes are managed.
    pub server_name: String,
    /// Edge listen port.
    pub listen_port: u16,
    /// `host:port` Caddy reaches ninsho's own UI at.
    pub portal_upstream: String,
    /// Page disabled routes redirect to.
    pub disabled_page: String,
    /// Per-call admin API timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Allow routes to ask backends for identity encoding.
    pub no_upstream_compression: bool,
    /// Response `Content-Encoding` for routes that set none.
    pub force_content_encoding: Option<String>,
    /// Push the route set once at startup.
    pub sync_on_startup: bool,
}

impl Default for CaddySettings {
    fn default() -> Self {
        let defaults = SynthesizerConfig::default();
        Self {
            admin_url: defaults.admin_url,
            server_name: defaults.server_name,
            listen_port: defaults.listen_port,
            portal_upstream: defaults.portal_upstream,
            disabled_page: defaults.disabled_page,
            request_timeout: defaults.request_timeout,
            no_upstream_compression: defaults.no_upstream_compression,
            force_content_encoding: None,
            sync_on_startup: true,
        }
    }
}

/// Health check settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Run the periodic sweep.
    pub enabled: bool,
    /// Time between sweeps; zero disables the sweep.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Probe timeout.
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Responses slower than this are `DEGRADED`.
    pub slow_threshold_ms: u64,
    /// Concurrent probes per sweep.
    pub concurrency: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(3),
            slow_threshold_ms: 2000,
            concurrency: 8,
        }
    }
}

/// Relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Verify backend certificates unless a route says otherwise.
    pub verify_tls: bool,
    /// Idle pooled connections kept per backend.
    pub pool_max_idle_per_host: usize,
    /// `Via` token.
    pub via: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        let defaults = RelayConfig::default();
        Self {
            verify_tls: defaults.verify_tls,
            pool_max_idle_per_host: defaults.pool_max_idle_per_host,
            via: defaults.via,
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log filter directive.
    pub log_level: String,
    /// Emit JSON logs.
    pub json_logs: bool,
    /// Record Prometheus metrics.
    pub metrics_enabled: bool,
    /// Standalone metrics exporter address.
    pub metrics_addr: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: true,
            metrics_addr: None,
        }
    }
}

/// Builder for `ServerConfig`.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen_addr = addr.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    /// Set the deployment mode.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.server.mode = mode;
        self
    }

    /// Set the routes file.
    #[must_use]
    pub fn routes_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.server.routes_file = Some(path.into());
        self
    }

    /// Set the Caddy admin URL.
    #[must_use]
    pub fn caddy_admin(mut self, url: impl Into<String>) -> Self {
        self.config.caddy.admin_url = url.into();
        self
    }

    /// Enable or disable the startup sync.
    #[must_use]
    pub fn sync_on_startup(mut self, enabled: bool) -> Self {
        self.config.caddy.sync_on_startup = enabled;
        self
    }

    /// Enable or disable periodic health checks.
    #[must_use]
    pub fn health_checks(mut self, enabled: bool) -> Self {
        self.config.health.enabled = enabled;
        self
    }

    /// Set the health check interval.
    #[must_use]
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health.interval = interval;
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.telemetry.log_level = level.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ServerResult<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Humantime-style `Duration` (de)serialization: `500ms`, `30s`, `5m`, `1h`,
/// or bare seconds.
pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit) = if let Some(n) = s.strip_suffix("ms") {
            (n, 1)
        } else if let Some(n) = s.strip_suffix('s') {
            (n, 1000)
        } else if let Some(n) = s.strip_suffix('m') {
            (n, 60_000)
        } else if let Some(n) = s.strip_suffix('h') {
            (n, 3_600_000)
        } else {
            (s, 1000)
        };

        let n: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s:?}"))?;
        Ok(Duration::from_millis(n.saturating_mul(unit)))
    }
}
