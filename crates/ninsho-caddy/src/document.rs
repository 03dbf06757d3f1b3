//! Serde model of the subset of Caddy's JSON config that ninsho emits.
//!
//! Field order follows Caddy's own documentation so rendered documents are
//! stable and diff cleanly. Header maps are ordered for the same reason.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered header name to values map.
pub type HeaderValues = IndexMap<String, Vec<String>>;

/// Full Caddy configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaddyDocument {
    /// Admin endpoint settings.
    pub admin: AdminConfig,
    /// Configured apps.
    pub apps: Apps,
}

/// Admin endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Listen address, e.g. `:2019`.
    pub listen: String,
}

/// Configured apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apps {
    /// The HTTP app.
    pub http: HttpApp,
}

/// Caddy's HTTP app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpApp {
    /// Servers by name.
    pub servers: IndexMap<String, Server>,
}

/// One HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Listen addresses, e.g. `:8080`.
    pub listen: Vec<String>,
    /// Accept cleartext HTTP/2.
    #[serde(default)]
    pub allow_h2c: bool,
    /// Route rules, evaluated in order.
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

/// A route rule: matchers, handlers and whether matching stops here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Matcher sets; any one matching selects the rule.
    #[serde(rename = "match")]
    pub matchers: Vec<PathMatch>,
    /// Handler chain.
    pub handle: Vec<Handler>,
    /// Stop evaluating further rules after this one.
    #[serde(default)]
    pub terminal: bool,
}

impl RouteRule {
    /// Matched paths of the first matcher set.
    pub fn paths(&self) -> &[String] {
        self.matchers.first().map_or(&[], |m| m.path.as_slice())
    }
}

/// Path matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMatch {
    /// Path patterns; `*` is a wildcard.
    pub path: Vec<String>,
}

/// A handler in a rule's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum Handler {
    /// Forward to upstreams.
    ReverseProxy(ReverseProxy),
    /// Answer directly.
    StaticResponse(StaticResponse),
}

/// `reverse_proxy` handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseProxy {
    /// Upstream pool.
    pub upstreams: Vec<Upstream>,
    /// Header manipulation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderOps>,
    /// Transport settings; absent for plain HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

/// An upstream address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    /// `host:port` to dial.
    pub dial: String,
}

/// Request and response header operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderOps {
    /// Operations on the upstream request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HeaderSet>,
    /// Operations on the downstream response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HeaderSet>,
}

/// Headers to set, replacing existing values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSet {
    /// Header values.
    pub set: HeaderValues,
}

/// `http` transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    /// Always `http`.
    pub protocol: String,
    /// TLS towards the upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// Upstream TLS settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// SNI and certificate name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Skip upstream certificate verification.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_verify: bool,
}

/// `static_response` handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticResponse {
    /// Response status.
    pub status_code: u16,
    /// Response headers.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: HeaderValues,
}
