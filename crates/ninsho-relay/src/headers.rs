//! Header hygiene for both legs of a relayed exchange.
//!
//! Headers are kept in an [`http::HeaderMap`], which is case-insensitive and
//! preserves repeated lines, so `Set-Cookie` and friends survive untouched.

use std::net::IpAddr;

use http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, EXPECT, FORWARDED, HOST, VIA,
};
use ninsho_core::Route;

/// Header name for the original client chain.
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Header name for the original scheme.
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Header name for the original host.
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Header name for the original port.
pub static X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

/// Header name for the route mount path.
pub static X_FORWARDED_PREFIX: HeaderName = HeaderName::from_static("x-forwarded-prefix");

/// Header name for the route mount path, ASP.NET flavour.
pub static X_FORWARDED_PATH_BASE: HeaderName = HeaderName::from_static("x-forwarded-pathbase");

/// Header name that turns off intermediary buffering.
pub static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Headers meaningful only for a single connection leg.
///
/// `content-length` is included because bodies are re-streamed.
pub static HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Whether `name` is in the static hop-by-hop set.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Header names listed in the `Connection` header(s) of `headers`.
pub fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

/// Remove the static hop-by-hop set and everything named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in connection_listed(headers) {
        headers.remove(&name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// What the relay knows about the downstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client IP address.
    pub addr: IpAddr,
    /// Scheme the client used to reach us.
    pub scheme: String,
}

impl ClientInfo {
    /// Client reached us over plain HTTP.
    pub fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            scheme: "http".to_string(),
        }
    }

    /// Override the inbound scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

/// Build the header set sent to the backend.
pub fn upstream_request_headers(inbound: &HeaderMap, route: &Route, client: &ClientInfo) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(EXPECT);
    if !route.preserve_host {
        headers.remove(HOST);
    }

    let host = inbound.get(HOST).and_then(|v| v.to_str().ok());

    append_comma(&mut headers, &X_FORWARDED_FOR, &client.addr.to_string());

    set_if_absent(&mut headers, &X_FORWARDED_PROTO, &client.scheme);
    if let Some(host) = host {
        set_if_absent(&mut headers, &X_FORWARDED_HOST, host);
    }
    let port = host
        .and_then(host_port)
        .unwrap_or(if client.scheme == "https" { 443 } else { 80 });
    set_if_absent(&mut headers, &X_FORWARDED_PORT, &port.to_string());

    append_comma(
        &mut headers,
        &FORWARDED,
        &forwarded_element(client.addr, &client.scheme, host),
    );

    if let Ok(prefix) = HeaderValue::from_str(&route.path) {
        headers.insert(X_FORWARDED_PREFIX.clone(), prefix.clone());
        headers.insert(X_FORWARDED_PATH_BASE.clone(), prefix);
    }

    headers
}

/// Build the header set returned downstream.
///
/// `keep_length` keeps the upstream `Content-Length` for bodiless
/// responses (HEAD, 204, 304).
pub fn downstream_response_headers(upstream: &HeaderMap, via: &HeaderValue, keep_length: bool) -> HeaderMap {
    let mut headers = upstream.clone();
    strip_hop_by_hop(&mut headers);

    if keep_length {
        if let Some(length) = upstream.get(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, length.clone());
        }
    }

    headers.insert(X_ACCEL_BUFFERING.clone(), HeaderValue::from_static("no"));
    if !headers.contains_key(VIA) {
        headers.insert(VIA, via.clone());
    }

    headers
}

/// One RFC 7239 `Forwarded` element.
pub fn forwarded_element(client: IpAddr, scheme: &str, host: Option<&str>) -> String {
    let node = match client {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("\"[{ip}]\""),
    };
    let mut element = format!("for={node};proto={scheme}");
    if let Some(host) = host {
        let escaped = host.replace('\\', "\\\\").replace('"', "\\\"");
        element.push_str(&format!(";host=\"{escaped}\""));
    }
    element
}

/// Explicit port of a `Host` header value.
fn host_port(host: &str) -> Option<u16> {
    let port = match host.strip_prefix('[') {
        Some(rest) => rest.split_once("]:")?.1,
        None => host.rsplit_once(':')?.1,
    };
    port.parse().ok()
}

/// Append `value` to every existing line of `name`, comma-joined.
fn append_comma(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    let mut joined: Vec<u8> = Vec::new();
    for existing in headers.get_all(name) {
        if !joined.is_empty() {
            joined.extend_from_slice(b", ");
        }
        joined.extend_from_slice(existing.as_bytes());
    }
    if !joined.is_empty() {
        joined.extend_from_slice(b", ");
    }
    joined.extend_from_slice(value.as_bytes());

    if let Ok(value) = HeaderValue::from_bytes(&joined) {
        headers.insert(name.clone(), value);
    }
}

fn set_if_absent(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    if headers.contains_key(name) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCEPT, SET_COOKIE};
    use proptest::prelude::*;

    fn route(preserve_host: bool) -> Route {
        Route::builder("/svc", "Svc", "192.168.1.10".parse().unwrap(), 8080)
            .preserve_host(preserve_host)
            .build()
            .unwrap()
    }

    fn client() -> ClientInfo {
        ClientInfo::new("203.0.113.7".parse().unwrap())
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("edge.example.com"));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, X-Custom-Hop"));
        headers.insert("x-custom-hop", HeaderValue::from_static("secret"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert(EXPECT, HeaderValue::from_static("100-continue"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers
    }

    #[test]
    fn test_is_hop_by_hop() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(is_hop_by_hop("Proxy-Connection"));
        assert!(!is_hop_by_hop("content-type"));
    }

    #[test]
    fn test_connection_listed_headers_removed() {
        let headers = upstream_request_headers(&inbound(), &route(false), &client());
        assert!(!headers.contains_key("x-custom-hop"));
        assert!(!headers.contains_key("keep-alive"));
        assert!(!headers.contains_key(CONNECTION));
        assert!(!headers.contains_key("te"));
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert!(!headers.contains_key(EXPECT));
        assert!(headers.contains_key(ACCEPT));
    }

    #[test]
    fn test_host_dropped_unless_preserved() {
        let dropped = upstream_request_headers(&inbound(), &route(false), &client());
        assert!(!dropped.contains_key(HOST));
        assert_eq!(dropped[&X_FORWARDED_HOST], "edge.example.com");

        let kept = upstream_request_headers(&inbound(), &route(true), &client());
        assert_eq!(kept[HOST], "edge.example.com");
    }

    #[test]
    fn test_forwarded_for_is_appended() {
        let mut headers = inbound();
        headers.insert(&X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.1"));
        headers.append(&X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.2"));

        let out = upstream_request_headers(&headers, &route(false), &client());
        assert_eq!(out[&X_FORWARDED_FOR], "198.51.100.1, 198.51.100.2, 203.0.113.7");
    }

    #[test]
    fn test_forwarded_headers_not_overwritten() {
        let mut headers = inbound();
        headers.insert(&X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        headers.insert(FORWARDED, HeaderValue::from_static("for=198.51.100.1"));

        let out = upstream_request_headers(&headers, &route(false), &client());
        assert_eq!(out[&X_FORWARDED_PROTO], "https");
        assert_eq!(out[&X_FORWARDED_PORT], "80");
        assert_eq!(
            out[FORWARDED],
            "for=198.51.100.1, for=203.0.113.7;proto=http;host=\"edge.example.com\""
        );
        assert_eq!(out[&X_FORWARDED_PREFIX], "/svc");
        assert_eq!(out[&X_FORWARDED_PATH_BASE], "/svc");
    }

    #[test]
    fn test_forwarded_port_from_host() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("[fd00::1]:8443"));
        let out = upstream_request_headers(&headers, &route(false), &client().with_scheme("https"));
        assert_eq!(out[&X_FORWARDED_PORT], "8443");
    }

    #[test]
    fn test_forwarded_element_ipv6() {
        let element = forwarded_element("fd00::7".parse().unwrap(), "https", None);
        assert_eq!(element, "for=\"[fd00::7]\";proto=https");
    }

    #[test]
    fn test_response_headers() {
        let mut upstream = HeaderMap::new();
        upstream.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        upstream.append(SET_COOKIE, HeaderValue::from_static("b=2; Path=/"));
        upstream.insert(CONNECTION, HeaderValue::from_static("x-backend-hop"));
        upstream.insert("x-backend-hop", HeaderValue::from_static("1"));
        upstream.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));

        let via = HeaderValue::from_static("1.1 ninsho");
        let out = downstream_response_headers(&upstream, &via, false);

        let cookies: Vec<_> = out.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
        assert!(!out.contains_key("x-backend-hop"));
        assert!(!out.contains_key(CONTENT_LENGTH));
        assert!(!out.contains_key("transfer-encoding"));
        assert_eq!(out[&X_ACCEL_BUFFERING], "no");
        assert_eq!(out[VIA], "1.1 ninsho");
    }

    #[test]
    fn test_response_keeps_length_when_bodiless() {
        let mut upstream = HeaderMap::new();
        upstream.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        upstream.insert(VIA, HeaderValue::from_static("1.1 backend-cache"));

        let via = HeaderValue::from_static("1.1 ninsho");
        let out = downstream_response_headers(&upstream, &via, true);
        assert_eq!(out[CONTENT_LENGTH], "1234");
        assert_eq!(out[VIA], "1.1 backend-cache");
    }

    fn header_name() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(HOP_BY_HOP.to_vec()).prop_map(str::to_string),
            "x-[a-z]{1,8}",
            Just("accept".to_string()),
            Just("cookie".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_no_hop_by_hop_survives(
            names in prop::collection::vec(header_name(), 0..12),
            listed in prop::collection::vec("x-[a-z]{1,8}", 0..4),
        ) {
            let mut headers = HeaderMap::new();
            for name in &names {
                headers.append(
                    HeaderName::from_bytes(name.as_bytes()).unwrap(),
                    HeaderValue::from_static("v"),
                );
            }
            if !listed.is_empty() {
                headers.insert(CONNECTION, HeaderValue::from_str(&listed.join(", ")).unwrap());
            }

            let out = upstream_request_headers(&headers, &route(false), &client());
            for name in HOP_BY_HOP {
                prop_assert!(!out.contains_key(*name));
            }
            for name in &listed {
                prop_assert!(!out.contains_key(name.as_str()));
            }

            let via = HeaderValue::from_static("1.1 ninsho");
            let back = downstream_response_headers(&headers, &via, false);
            for name in HOP_BY_HOP {
                prop_assert!(!back.contains_key(*name));
            }
            for name in &listed {
                prop_assert!(!back.contains_key(name.as_str()));
            }
        }
    }
}
