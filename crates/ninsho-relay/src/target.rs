//! Backend URL construction.

use std::net::IpAddr;

use ninsho_core::{Protocol, Route};

/// Host used in backend URLs.
///
/// HTTPS routes with an `sni` are addressed by that name so the TLS
/// handshake presents it; the client pins the name to `target_ip`.
pub fn target_host(route: &Route) -> String {
    match (&route.protocol, route.sni.as_deref()) {
        (Protocol::Https, Some(sni)) if !sni.is_empty() => sni.to_string(),
        _ => match route.target_ip {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{ip}]"),
        },
    }
}

/// Join a backend prefix and a request sub-path with exactly one `/`.
///
/// An empty sub-path leaves `base` untouched; a trailing `/` on the
/// sub-path is kept.
pub fn join_path(base: &str, sub: &str) -> String {
    let base = if base.is_empty() { "/" } else { base };
    if sub.is_empty() {
        return if base.starts_with('/') {
            base.to_string()
        } else {
            format!("/{base}")
        };
    }

    let head = base.trim_end_matches('/');
    let tail = sub.trim_start_matches('/');
    if head.is_empty() || head.starts_with('/') {
        format!("{head}/{tail}")
    } else {
        format!("/{head}/{tail}")
    }
}

/// Full backend URL for a request.
///
/// `query` is appended verbatim so repeated parameters survive.
pub fn build_target_url(route: &Route, sub_path: &str, query: Option<&str>) -> String {
    let mut url = format!(
        "{}://{}:{}{}",
        route.protocol,
        target_host(route),
        route.target_port,
        join_path(&route.target_path, sub_path)
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn route(target_path: &str) -> Route {
        Route::builder("/svc", "Svc", "192.168.1.10".parse().unwrap(), 8080)
            .target_path(target_path)
            .build()
            .unwrap()
    }

    #[test]
    fn test_join_path_cases() {
        assert_eq!(join_path("/", ""), "/");
        assert_eq!(join_path("/", "/foo"), "/foo");
        assert_eq!(join_path("/", "/"), "/");
        assert_eq!(join_path("/api", ""), "/api");
        assert_eq!(join_path("/api/", ""), "/api/");
        assert_eq!(join_path("/api", "/v1/users"), "/api/v1/users");
        assert_eq!(join_path("/api/", "/v1/"), "/api/v1/");
        assert_eq!(join_path("/api", "/"), "/api/");
        assert_eq!(join_path("api", "x"), "/api/x");
    }

    #[test]
    fn test_build_target_url() {
        assert_eq!(
            build_target_url(&route("/"), "/web/index.html", None),
            "http://192.168.1.10:8080/web/index.html"
        );
        assert_eq!(
            build_target_url(&route("/app"), "/search", Some("tag=a&tag=b")),
            "http://192.168.1.10:8080/app/search?tag=a&tag=b"
        );
        assert_eq!(
            build_target_url(&route("/app"), "", Some("")),
            "http://192.168.1.10:8080/app"
        );
    }

    #[test]
    fn test_ipv6_and_sni_hosts() {
        let v6 = Route::builder("/v6", "V6", "fd00::10".parse().unwrap(), 80)
            .build()
            .unwrap();
        assert_eq!(build_target_url(&v6, "/x", None), "http://[fd00::10]:80/x");

        let tls = Route::builder("/tls", "Tls", "10.0.0.8".parse().unwrap(), 8443)
            .protocol(Protocol::Https)
            .sni("nas.home.arpa")
            .build()
            .unwrap();
        assert_eq!(build_target_url(&tls, "", None), "https://nas.home.arpa:8443/");
    }

    proptest! {
        #[test]
        fn prop_single_separator(
            base in "(/[a-z0-9_-]{1,6}){0,3}/?",
            sub in "(/{1,2}[a-z0-9._-]{1,6}){0,3}/?",
        ) {
            let joined = join_path(&base, &sub);
            prop_assert!(joined.starts_with('/'));

            let base_trimmed = base.trim_end_matches('/');
            let sub_trimmed = sub.trim_start_matches('/');
            if !sub.is_empty() {
                prop_assert_eq!(&joined, &format!("{base_trimmed}/{sub_trimmed}"));
                prop_assert!(!joined[..=base_trimmed.len()].contains("//"));
            }
        }
    }
}
