//! Route set to Caddy document synthesis, and the sync entry point.

use std::cmp::Reverse;
use std::time::Duration;

use indexmap::IndexMap;
use ninsho_core::{Protocol, Route};
use ninsho_health::{Classifier, HealthReport, ProbeOptions};
use tracing::{debug, error, info, warn};

use crate::admin::{AdminClient, SyncOutcome};
use crate::document::{
    AdminConfig, Apps, CaddyDocument, Handler, HeaderOps, HeaderSet, HeaderValues, HttpApp,
    PathMatch, ReverseProxy, RouteRule, Server, StaticResponse, TlsConfig, Transport, Upstream,
};
use crate::error::SyncResult;

/// Paths the control plane's own UI and API answer on.
const PORTAL_PATHS: &[&str] = &[
    "/",
    "/admin",
    "/admin/*",
    "/api/*",
    "/static/*",
    "/health",
    "/logs",
    "/favicon.ico",
];

/// Synthesizer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizerConfig {
    /// Caddy admin API base URL.
    pub admin_url: String,
    /// Name of the Caddy server whose routes are replaced.
    pub server_name: String,
    /// Edge listen port written into the full document.
    pub listen_port: u16,
    /// Admin listen address written into the full document.
    pub admin_listen: String,
    /// `host:port` of the control plane's own UI.
    pub portal_upstream: String,
    /// Page disabled routes redirect to.
    pub disabled_page: String,
    /// Per-call admin API timeout.
    pub request_timeout: Duration,
    /// Allow routes to request `Accept-Encoding: identity` upstream.
    pub no_upstream_compression: bool,
    /// Response `Content-Encoding` forced on routes that set none.
    pub force_content_encoding: Option<String>,
    /// Probe settings for [`Synthesizer::test_connection`].
    pub probe: ProbeOptions,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            admin_url: "http://caddy:2019".to_string(),
            server_name: "srv0".to_string(),
            listen_port: 8080,
            admin_listen: ":2019".to_string(),
            portal_upstream: "app:8000".to_string(),
            disabled_page: "/route-disabled".to_string(),
            request_timeout: Duration::from_secs(10),
            no_upstream_compression: true,
            force_content_encoding: None,
            probe: ProbeOptions::default(),
        }
    }
}

/// Builds the Caddy route document for a route set and pushes it.
///
/// Building is pure: the same route set always renders the same bytes, so
/// [`Synthesizer::sync`] can be called after every change, repeatedly and
/// out of order.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    config: SynthesizerConfig,
    admin: AdminClient,
    classifier: Classifier,
}

impl Synthesizer {
    /// Create a synthesizer.
    pub fn new(config: SynthesizerConfig) -> SyncResult<Self> {
        let admin = AdminClient::new(&config.admin_url, &config.server_name, config.request_timeout)?;
        let classifier = Classifier::new()?;
        Ok(Self {
            config,
            admin,
            classifier,
        })
    }

    /// Settings in use.
    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// Admin API client.
    pub fn admin(&self) -> &AdminClient {
        &self.admin
    }

    /// Build the ordered rule array for `routes`.
    ///
    /// Routes are visited longest mount first, ties in input order. Disabled
    /// routes become redirects to the disabled page; enabled routes become
    /// reverse proxies. The portal rule always comes last.
    pub fn build_routes(&self, routes: &[Route]) -> Vec<RouteRule> {
        let mut ordered: Vec<&Route> = routes.iter().collect();
        ordered.sort_by_key(|route| Reverse(route.path.len()));

        let mut rules = Vec::with_capacity(ordered.len() + 1);
        for route in ordered {
            if route.path.is_empty() || !route.path.starts_with('/') {
                warn!(path = %route.path, name = %route.name, "skipping invalid route path");
                continue;
            }

            if route.enabled {
                debug!(
                    path = %route.path,
                    target = %route.origin(),
                    "adding backend route"
                );
                rules.push(self.proxy_rule(route));
            } else {
                debug!(path = %route.path, "adding disabled route redirect");
                rules.push(self.disabled_rule(route));
            }
        }

        rules.push(self.portal_rule());
        rules
    }

    /// Build the full Caddy document for `routes`.
    pub fn build_document(&self, routes: &[Route]) -> CaddyDocument {
        let server = Server {
            listen: vec![format!(":{}", self.config.listen_port)],
            allow_h2c: true,
            routes: self.build_routes(routes),
        };

        CaddyDocument {
            admin: AdminConfig {
                listen: self.config.admin_listen.clone(),
            },
            apps: Apps {
                http: HttpApp {
                    servers: IndexMap::from([(self.config.server_name.clone(), server)]),
                },
            },
        }
    }

    /// Serialized rule array, exactly as pushed.
    pub fn render_routes(&self, routes: &[Route]) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.build_routes(routes))?)
    }

    /// Build the rule array for `routes` and replace Caddy's with it.
    pub async fn sync(&self, routes: &[Route]) -> SyncResult<SyncOutcome> {
        let body = self.render_routes(routes)?;
        info!(
            routes = routes.len(),
            url = %self.admin.routes_url(),
            "caddy sync replacing routes"
        );

        match self.admin.replace_routes(body).await {
            Ok(outcome) => {
                info!(outcome = outcome.as_str(), "caddy sync completed");
                ninsho_telemetry::metrics::record_caddy_sync(outcome.as_str());
                Ok(outcome)
            }
            Err(e) => {
                error!(category = e.category(), error = %e, "caddy sync failed");
                ninsho_telemetry::metrics::record_caddy_sync("failed");
                Err(e)
            }
        }
    }

    /// Probe a route's backend directly.
    pub async fn test_connection(&self, route: &Route) -> HealthReport {
        self.classifier.check_route(route, &self.config.probe).await
    }

    fn proxy_rule(&self, route: &Route) -> RouteRule {
        let mount = route.path.as_str();

        let mut request: HeaderValues = IndexMap::new();
        request.insert("X-Forwarded-Prefix".to_string(), vec![mount.to_string()]);
        request.insert("X-Forwarded-PathBase".to_string(), vec![mount.to_string()]);
        request.insert(
            "X-Forwarded-Proto".to_string(),
            vec!["{http.request.scheme}".to_string()],
        );
        request.insert(
            "X-Forwarded-For".to_string(),
            vec!["{http.request.remote.host}".to_string()],
        );
        if self.config.no_upstream_compression && route.no_upstream_compression {
            request.insert("Accept-Encoding".to_string(), vec!["identity".to_string()]);
        }
        if route.preserve_host {
            request.insert("Host".to_string(), vec!["{http.request.host}".to_string()]);
        }

        let forced = route
            .force_content_encoding
            .as_deref()
            .or(self.config.force_content_encoding.as_deref())
            .filter(|encoding| !encoding.is_empty());
        let response = forced.map(|encoding| HeaderSet {
            set: IndexMap::from([
                ("Content-Encoding".to_string(), vec![encoding.to_string()]),
                ("Vary".to_string(), vec!["Accept-Encoding".to_string()]),
            ]),
        });

        let transport = (route.protocol == Protocol::Https).then(|| Transport {
            protocol: "http".to_string(),
            tls: Some(TlsConfig {
                server_name: route.sni.clone().filter(|sni| !sni.is_empty()),
                insecure_skip_verify: route.insecure_skip_verify,
            }),
        });

        RouteRule {
            matchers: vec![mount_match(mount)],
            handle: vec![Handler::ReverseProxy(ReverseProxy {
                upstreams: vec![Upstream {
                    dial: route.dial_address(),
                }],
                headers: Some(HeaderOps {
                    request: Some(HeaderSet { set: request }),
                    response,
                }),
                transport,
            })],
            terminal: true,
        }
    }

    fn disabled_rule(&self, route: &Route) -> RouteRule {
        RouteRule {
            matchers: vec![mount_match(&route.path)],
            handle: vec![Handler::StaticResponse(StaticResponse {
                status_code: 302,
                headers: IndexMap::from([(
                    "Location".to_string(),
                    vec![self.disabled_location(route)],
                )]),
            })],
            terminal: true,
        }
    }

    fn portal_rule(&self) -> RouteRule {
        let mut paths: Vec<String> = PORTAL_PATHS.iter().map(|p| (*p).to_string()).collect();
        if !paths.contains(&self.config.disabled_page) {
            paths.push(self.config.disabled_page.clone());
        }

        RouteRule {
            matchers: vec![PathMatch { path: paths }],
            handle: vec![Handler::ReverseProxy(ReverseProxy {
                upstreams: vec![Upstream {
                    dial: self.config.portal_upstream.clone(),
                }],
                headers: Some(HeaderOps {
                    request: Some(HeaderSet {
                        set: IndexMap::from([
                            ("X-Forwarded-Prefix".to_string(), vec!["/".to_string()]),
                            ("X-Forwarded-PathBase".to_string(), vec!["/".to_string()]),
                        ]),
                    }),
                    response: None,
                }),
                transport: None,
            })],
            terminal: false,
        }
    }

    /// Redirect target for a disabled route.
    pub fn disabled_location(&self, route: &Route) -> String {
        disabled_location(&self.config.disabled_page, route)
    }
}

/// `page?path=..&name=..` with both values percent-encoded.
pub fn disabled_location(page: &str, route: &Route) -> String {
    format!(
        "{}?path={}&name={}",
        page,
        urlencoding::encode(&route.path),
        urlencoding::encode(&route.name)
    )
}

fn mount_match(mount: &str) -> PathMatch {
    PathMatch {
        path: vec![mount.to_string(), format!("{mount}/*")],
    }
}
