//! HTTP listener: internal endpoints in every mode, route relaying in relay
//! mode.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use ninsho_core::RouteTable;
use ninsho_relay::{BoxError, ClientInfo, Relay, RelayBody};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::{Mode, ServerConfig};
use crate::control::ControlPlane;
use crate::error::{ErrorResponse, ServerError, ServerResult};
use crate::shutdown::ShutdownSignal;

/// Prefix of operator endpoints that act on the control plane.
const INTERNAL_PREFIX: &str = "/_ninsho/";

struct AppState {
    control: Arc<ControlPlane>,
    relay: Relay,
    mode: Mode,
    disabled_page: String,
}

/// The ninsho HTTP server.
pub struct Server {
    addr: SocketAddr,
    state: Arc<AppState>,
}

impl Server {
    /// Create a server for `config` backed by `control`.
    pub fn new(config: &ServerConfig, control: Arc<ControlPlane>) -> ServerResult<Self> {
        let addr = SocketAddr::new(config.listen_ip()?, config.server.listen_port);
        let relay = Relay::new(config.relay_config())?;

        Ok(Self {
            addr,
            state: Arc::new(AppState {
                control,
                relay,
                mode: config.server.mode,
                disabled_page: config.caddy.disabled_page.clone(),
            }),
        })
    }

    /// Configured listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::server(format!("failed to bind {}: {e}", self.addr)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, mode = self.state.mode.as_str(), "ninsho listening");

        loop {
            let (stream, peer) = tokio::select! {
                () = shutdown.recv() => {
                    info!("listener stopping");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let service = service_fn(move |req| handle_request(req, Arc::clone(&state), peer));
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(peer = %peer, error = %e, "connection error");
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    peer: SocketAddr,
) -> Result<Response<RelayBody>, Infallible> {
    let path = req.uri().path().to_string();

    match (req.method(), path.as_str()) {
        (&Method::GET, "/health") => return Ok(health(&state)),
        (&Method::GET, "/metrics") => return Ok(metrics()),
        _ => {}
    }

    if let Some(rest) = path.strip_prefix(INTERNAL_PREFIX) {
        return Ok(internal(req.method(), rest, &state).await);
    }

    if state.mode != Mode::Relay {
        return Ok(text_response(StatusCode::NOT_FOUND, "Route not found"));
    }

    let routes = match state.control.store().list_routes(false) {
        Ok(routes) => routes,
        Err(e) => {
            error!(error = %e, "failed to read routes");
            return Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "Proxy error"));
        }
    };
    let table = RouteTable::from_routes(routes);

    let Some((route, sub_path)) = table.match_path(&path) else {
        debug!(path = %path, "no route matched");
        return Ok(text_response(StatusCode::NOT_FOUND, "Route not found"));
    };

    if !route.enabled {
        let location = ninsho_caddy::disabled_location(&state.disabled_page, route);
        debug!(route = %route.path, "route disabled, redirecting");
        return Ok(redirect(&location));
    }

    let client = ClientInfo::new(peer.ip());
    Ok(state.relay.forward(route, sub_path, req, &client).await)
}

async fn internal(method: &Method, rest: &str, state: &AppState) -> Response<RelayBody> {
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["routes"]) => match state.control.store().list_routes(false) {
            Ok(routes) => json_response(StatusCode::OK, &routes),
            Err(e) => server_error(&ServerError::from(e)),
        },
        (&Method::POST, ["sync"]) => match state.control.routes_changed().await {
            Ok(outcome) => json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "ok": true,
                    "outcome": outcome.map(|o| o.as_str()),
                }),
            ),
            Err(e) => server_error(&e),
        },
        (&Method::POST, ["routes", id, "test"]) => match state.control.test_route(id).await {
            Ok(report) => json_response(StatusCode::OK, &report),
            Err(e) => server_error(&e),
        },
        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse::new("not_found", format!("unknown internal endpoint: {rest}")),
        ),
    }
}

fn health(state: &AppState) -> Response<RelayBody> {
    let routes = state
        .control
        .store()
        .list_routes(false)
        .map(|r| r.len())
        .unwrap_or_default();

    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "status": "ok",
            "version": crate::VERSION,
            "mode": state.mode.as_str(),
            "routes": routes,
            "health_sweep": state.control.is_sweeping(),
        }),
    )
}

fn metrics() -> Response<RelayBody> {
    match ninsho_telemetry::render_metrics() {
        Some(text) => {
            let mut response = Response::new(full(Bytes::from(text)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        None => text_response(StatusCode::NOT_FOUND, "Metrics disabled"),
    }
}

fn server_error(err: &ServerError) -> Response<RelayBody> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(category = err.category(), error = %err, "internal endpoint failed");
    }
    json_response(status, &ErrorResponse::from(err))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<RelayBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(full(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response(status: StatusCode, text: &'static str) -> Response<RelayBody> {
    let mut response = Response::new(full(Bytes::from_static(text.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn redirect(location: &str) -> Response<RelayBody> {
    let mut response = Response::new(full(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}

fn full(bytes: Bytes) -> RelayBody {
    Full::new(bytes)
        .map_err(|never: Infallible| -> BoxError { match never {} })
        .boxed_unsync()
}
