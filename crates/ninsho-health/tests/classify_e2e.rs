//! End-to-end classifier tests against local backends.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use ninsho_core::{Protocol, Route};
use ninsho_health::{Classifier, HealthReport, HealthState, ProbeOptions, Reason};
use tokio::net::TcpListener;

/// Spawn a backend that answers every request with `status` after `delay`.
async fn spawn_backend(status: StatusCode, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| async move {
                    tokio::time::sleep(delay).await;
                    let mut response = Response::new(Full::new(Bytes::from_static(b"ok")));
                    *response.status_mut() = status;
                    Ok::<_, Infallible>(response)
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// A loopback port with nothing listening.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_fast_ok_is_up() {
    let addr = spawn_backend(StatusCode::OK, Duration::ZERO).await;
    let classifier = Classifier::new().unwrap();

    let result = classifier
        .classify(&format!("http://{addr}/"), Duration::from_secs(3), 2000)
        .await;

    assert_eq!(result.state, HealthState::Up);
    assert_eq!(result.reason, Reason::Online);
    assert_eq!(result.http_status, Some(200));
    assert!(result.duration_ms.is_some());
    assert!(result.detail.contains("200"));
}

#[tokio::test]
async fn test_client_error_counts_as_up() {
    let addr = spawn_backend(StatusCode::NOT_FOUND, Duration::ZERO).await;
    let classifier = Classifier::new().unwrap();

    let result = classifier
        .classify(&format!("http://{addr}/missing"), Duration::from_secs(3), 2000)
        .await;

    assert_eq!(result.state, HealthState::Up);
    assert_eq!(result.http_status, Some(404));
}

#[tokio::test]
async fn test_server_error_is_down() {
    let addr = spawn_backend(StatusCode::SERVICE_UNAVAILABLE, Duration::ZERO).await;
    let classifier = Classifier::new().unwrap();

    let result = classifier
        .classify(&format!("http://{addr}/"), Duration::from_secs(3), 2000)
        .await;

    assert_eq!(result.state, HealthState::Down);
    assert_eq!(result.reason, Reason::Error5xx);
    assert_eq!(result.http_status, Some(503));
    assert!(result.detail.contains("503"));
}

#[tokio::test]
async fn test_slow_response_is_degraded() {
    let addr = spawn_backend(StatusCode::OK, Duration::from_millis(300)).await;
    let classifier = Classifier::new().unwrap();

    let result = classifier
        .classify(&format!("http://{addr}/"), Duration::from_secs(3), 100)
        .await;

    assert_eq!(result.state, HealthState::Degraded);
    assert_eq!(result.reason, Reason::Slow);
    assert!(result.duration_ms.unwrap() >= 100);
}

#[tokio::test]
async fn test_hanging_backend_times_out() {
    let addr = spawn_backend(StatusCode::OK, Duration::from_secs(30)).await;
    let classifier = Classifier::new().unwrap();

    let result = classifier
        .classify(&format!("http://{addr}/"), Duration::from_secs(1), 2000)
        .await;

    assert_eq!(result.state, HealthState::Down);
    assert_eq!(result.reason, Reason::Timeout);
    assert!(result.detail.contains("timeout after 1s"));
    assert!(result.http_status.is_none());
}

#[tokio::test]
async fn test_refused_connection_is_offline_conn() {
    let addr = closed_port().await;
    let classifier = Classifier::new().unwrap();

    let result = classifier
        .classify(&format!("http://{addr}/"), Duration::from_secs(2), 2000)
        .await;

    assert_eq!(result.state, HealthState::Down);
    assert_eq!(result.reason, Reason::OfflineConn);
    assert!(result.detail.contains("TCP connect failed"));
    assert!(result.duration_ms.is_none());
}

#[tokio::test]
async fn test_report_shape_for_failure() {
    let addr = spawn_backend(StatusCode::INTERNAL_SERVER_ERROR, Duration::ZERO).await;
    let classifier = Classifier::new().unwrap();

    let classification = classifier
        .probe(&format!("http://{addr}/"), &ProbeOptions::default())
        .await;
    let report = HealthReport::from(&classification);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["status"], "error");
    assert_eq!(json["status_code"], 500);
    assert!(json["response_time"].is_u64());
    assert!(json["error"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn test_sni_route_dials_target_address() {
    // Plain HTTP backend: the TLS handshake fails, but only after DNS is
    // skipped and TCP reaches the target address.
    let addr = spawn_backend(StatusCode::OK, Duration::ZERO).await;
    let mut route = Route::builder("/nas", "NAS", "10.0.0.1".parse().unwrap(), addr.port())
        .protocol(Protocol::Https)
        .sni("nas.internal.invalid")
        .timeout(2)
        .build()
        .unwrap();
    route.target_ip = addr.ip();

    let classifier = Classifier::new().unwrap();
    let result = classifier.probe_route(&route, &ProbeOptions::default()).await;

    assert_eq!(result.state, HealthState::Down);
    assert_eq!(result.reason, Reason::ErrorExc, "{}", result.detail);
}
