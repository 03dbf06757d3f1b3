//! End-to-end tests of the listener in relay mode.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use ninsho_core::{CoreResult, Route, RouteStatus, RouteStore};
use ninsho_server::{ControlPlane, Mode, Server, ServerConfig, ShutdownSignal};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Store without target validation so routes can point at loopback.
#[derive(Default)]
struct TestStore {
    routes: Mutex<Vec<Route>>,
}

impl RouteStore for TestStore {
    fn list_routes(&self, enabled_only: bool) -> CoreResult<Vec<Route>> {
        let routes = self.routes.lock().unwrap();
        Ok(routes
            .iter()
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect())
    }

    fn get_route(&self, id: &str) -> CoreResult<Option<Route>> {
        Ok(self.routes.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    fn get_route_by_path(&self, path: &str) -> CoreResult<Option<Route>> {
        Ok(self.routes.lock().unwrap().iter().find(|r| r.path == path).cloned())
    }

    fn update_status(&self, id: &str, status: RouteStatus, at: DateTime<Utc>) -> CoreResult<()> {
        if let Some(route) = self.routes.lock().unwrap().iter_mut().find(|r| r.id == id) {
            route.status = status;
            route.last_check = Some(at);
        }
        Ok(())
    }
}

async fn spawn_backend() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let body = format!("backend saw {}", req.uri());
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

fn loopback_route(path: &str, name: &str, backend: SocketAddr, enabled: bool) -> Route {
    let mut route = Route::builder(path, name, "10.0.0.1".parse().unwrap(), backend.port())
        .timeout(2)
        .build()
        .unwrap();
    route.target_ip = Ipv4Addr::LOCALHOST.into();
    route.enabled = enabled;
    route
}

struct Harness {
    base: String,
    shutdown: ShutdownSignal,
    handle: JoinHandle<ninsho_server::ServerResult<()>>,
    client: reqwest::Client,
}

async fn start(mode: Mode, routes: Vec<Route>) -> Harness {
    let config = ServerConfig::builder()
        .mode(mode)
        .health_checks(false)
        .sync_on_startup(false)
        .build()
        .unwrap();
    let store = Arc::new(TestStore {
        routes: Mutex::new(routes),
    });
    let control = Arc::new(ControlPlane::new(&config, store).unwrap());
    let server = Server::new(&config, control).unwrap();

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    Harness {
        base,
        shutdown,
        handle,
        client,
    }
}

#[tokio::test]
async fn test_relays_matched_route() {
    let backend = spawn_backend().await;
    let h = start(
        Mode::Relay,
        vec![loopback_route("/svc", "Service", backend, true)],
    )
    .await;

    let response = h
        .client
        .get(format!("{}/svc/items?page=2", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "backend saw /items?page=2");
}

#[tokio::test]
async fn test_disabled_route_redirects() {
    let backend = spawn_backend().await;
    let h = start(
        Mode::Relay,
        vec![loopback_route("/off", "Off Line", backend, false)],
    )
    .await;

    let response = h.client.get(format!("{}/off/x", h.base)).send().await.unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(
        response.headers()["location"],
        "/route-disabled?path=%2Foff&name=Off%20Line"
    );
}

#[tokio::test]
async fn test_unmatched_path_is_not_found() {
    let backend = spawn_backend().await;
    let h = start(
        Mode::Relay,
        vec![loopback_route("/svc", "Service", backend, true)],
    )
    .await;

    let response = h.client.get(format!("{}/svcx", h.base)).send().await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Route not found");
}

#[tokio::test]
async fn test_control_mode_does_not_relay() {
    let backend = spawn_backend().await;
    let h = start(
        Mode::Control,
        vec![loopback_route("/svc", "Service", backend, true)],
    )
    .await;

    let response = h.client.get(format!("{}/svc/items", h.base)).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_health_endpoint() {
    let backend = spawn_backend().await;
    let h = start(
        Mode::Relay,
        vec![loopback_route("/svc", "Service", backend, true)],
    )
    .await;

    let body: serde_json::Value = h
        .client
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "relay");
    assert_eq!(body["routes"], 1);
}

#[tokio::test]
async fn test_internal_endpoints() {
    let backend = spawn_backend().await;
    let route = loopback_route("/svc", "Service", backend, true);
    let id = route.id.clone();
    let h = start(Mode::Relay, vec![route]).await;

    let listed: serde_json::Value = h
        .client
        .get(format!("{}/_ninsho/routes", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["path"], "/svc");

    let sync: serde_json::Value = h
        .client
        .post(format!("{}/_ninsho/sync", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sync["ok"], true);
    assert!(sync["outcome"].is_null());

    let missing = h
        .client
        .post(format!("{}/_ninsho/routes/nope/test", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let tested: serde_json::Value = h
        .client
        .post(format!("{}/_ninsho/routes/{id}/test", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tested["success"], true);
}

#[tokio::test]
async fn test_shutdown_stops_listener() {
    let h = start(Mode::Relay, Vec::new()).await;
    h.shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(2), h.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
