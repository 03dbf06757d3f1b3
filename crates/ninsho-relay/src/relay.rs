//! The forwarding engine.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{stream, Stream, StreamExt};
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION, VIA};
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body, Frame};
use ninsho_core::{Protocol, Route};
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::headers::{downstream_response_headers, upstream_request_headers, ClientInfo};
use crate::redirect::rewrite_location;
use crate::target::build_target_url;

/// Boxed error carried by relayed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every relay response.
pub type RelayBody = UnsyncBoxBody<Bytes, BoxError>;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Verify backend certificates unless a route overrides it.
    pub verify_tls: bool,
    /// Idle pooled connections kept per backend.
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,
    /// `Via` token added to responses that lack one.
    pub via: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            verify_tls: false,
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            via: "1.1 ninsho".to_string(),
        }
    }
}

/// Clients differ only in these settings; routes that agree share a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    connect_timeout: Duration,
    verify_tls: bool,
    pinned: Option<(String, SocketAddr)>,
}

/// Forwards requests for a route to its backend and streams the response.
///
/// One `Relay` serves every route. Connection pools are shared between
/// requests and keyed by the per-route client settings, so disabling
/// certificate verification for one route never leaks into another.
#[derive(Debug)]
pub struct Relay {
    config: RelayConfig,
    via: HeaderValue,
    clients: DashMap<ClientKey, Client>,
}

impl Relay {
    /// Create a relay.
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        let via = HeaderValue::from_str(&config.via)
            .map_err(|_| RelayError::config(format!("invalid via token {:?}", config.via)))?;

        Ok(Self {
            config,
            via,
            clients: DashMap::new(),
        })
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Forward `request` to `route`'s backend.
    ///
    /// `sub_path` is the part of the request path after the route's mount,
    /// as returned by [`RouteTable::match_path`](ninsho_core::RouteTable::match_path);
    /// the caller strips the mount, `forward` only appends what it is given
    /// to the target path. Every failure is turned into a response; this
    /// never errors.
    ///
    /// `route.timeout` bounds the wait for response headers and, separately,
    /// each gap between body chunks; a stalled body ends with an error.
    pub async fn forward<B>(
        &self,
        route: &Route,
        sub_path: &str,
        request: Request<B>,
        client: &ClientInfo,
    ) -> Response<RelayBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let response = match self.try_forward(route, sub_path, request, client).await {
            Ok(response) => {
                info!(
                    route = %route.path,
                    method = %method,
                    path = %path,
                    status = response.status().as_u16(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "proxy request"
                );
                response
            }
            Err(e) => {
                error!(
                    route = %route.path,
                    method = %method,
                    path = %path,
                    category = e.category(),
                    error = %e,
                    "proxy request failed"
                );
                self.error_response(&e)
            }
        };

        ninsho_telemetry::metrics::record_relay_request(
            &route.path,
            response.status().as_u16(),
            started.elapsed(),
        );
        response
    }

    async fn try_forward<B>(
        &self,
        route: &Route,
        sub_path: &str,
        request: Request<B>,
        client: &ClientInfo,
    ) -> RelayResult<Response<RelayBody>>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        if !route.enabled {
            return Err(RelayError::RouteDisabled {
                path: route.path.clone(),
            });
        }

        let (parts, body) = request.into_parts();
        let url = build_target_url(route, sub_path, parts.uri.query());
        let headers = upstream_request_headers(&parts.headers, route, client);
        let http = self.client_for(route)?;

        let mut upstream = http.request(parts.method.clone(), &url).headers(headers);
        if !body.is_end_stream() {
            upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        debug!(route = %route.path, target = %url, "forwarding");

        let response = tokio::time::timeout(route.timeout(), upstream.send())
            .await
            .map_err(|_| RelayError::Timeout(route.timeout()))?
            .map_err(RelayError::upstream)?;

        let status = response.status();
        let bodiless = parts.method == Method::HEAD
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;

        let mut headers = downstream_response_headers(response.headers(), &self.via, bodiless);
        if status.is_redirection() {
            rewrite_redirect(&mut headers, route);
        }

        let body = if bodiless {
            drop(response);
            empty_body()
        } else {
            let chunks = read_limited(
                response.bytes_stream(),
                route.timeout(),
                route.path.clone(),
            );
            StreamBody::new(chunks.map(|chunk| chunk.map(Frame::data))).boxed_unsync()
        };

        let mut out = Response::new(body);
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        Ok(out)
    }

    /// Minimal plain-text response for a relay error.
    pub fn error_response(&self, err: &RelayError) -> Response<RelayBody> {
        let mut response = Response::new(text_body(err.public_message()));
        *response.status_mut() = err.status_code();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.headers_mut().insert(VIA, self.via.clone());
        response
    }

    fn client_for(&self, route: &Route) -> RelayResult<Client> {
        let verify_tls = route.verify_tls(self.config.verify_tls);
        let pinned = match (&route.protocol, route.sni.as_deref()) {
            (Protocol::Https, Some(sni)) if !sni.is_empty() => {
                Some((sni.to_string(), route.target_addr()))
            }
            _ => None,
        };
        let key = ClientKey {
            connect_timeout: route.connect_timeout(),
            verify_tls,
            pinned,
        };

        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .connect_timeout(key.connect_timeout)
            .redirect(Policy::none())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .pool_idle_timeout(self.config.pool_idle_timeout)
            .no_proxy()
            .danger_accept_invalid_certs(!verify_tls);
        if let Some((name, addr)) = &key.pinned {
            builder = builder.resolve(name, *addr);
        }
        let client = builder.build().map_err(RelayError::Client)?;

        if !verify_tls && route.protocol == Protocol::Https {
            debug!(route = %route.path, "backend certificate verification disabled");
        }

        Ok(self.clients.entry(key).or_insert(client).clone())
    }
}

/// Ends the body with an error once the backend goes `idle` without
/// sending a chunk. Dropping the stream closes the upstream connection.
fn read_limited<S>(
    chunks: S,
    idle: Duration,
    route: String,
) -> impl Stream<Item = Result<Bytes, BoxError>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(chunks)), move |state| {
        let route = route.clone();
        async move {
            let mut chunks = state?;
            match tokio::time::timeout(idle, chunks.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(chunks))),
                Ok(Some(Err(e))) => Some((Err(Box::new(e) as BoxError), None)),
                Ok(None) => None,
                Err(_) => {
                    warn!(route = %route, idle_secs = idle.as_secs(), "backend body stalled");
                    Some((Err(Box::new(RelayError::Timeout(idle)) as BoxError), None))
                }
            }
        }
    })
}

fn rewrite_redirect(headers: &mut HeaderMap, route: &Route) {
    let rewritten = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| rewrite_location(location, route));

    if let Some(location) = rewritten {
        if let Ok(value) = HeaderValue::from_str(&location) {
            debug!(route = %route.path, location = %location, "rewrote redirect");
            headers.insert(LOCATION, value);
        }
    }
}

fn empty_body() -> RelayBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed_unsync()
}

fn text_body(text: &'static str) -> RelayBody {
    Full::new(Bytes::from_static(text.as_bytes()))
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed_unsync()
}
