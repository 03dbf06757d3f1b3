//! `Location` rewriting for backend redirects.
//!
//! Only locations that point back at the backend's own origin are rewritten
//! into the route's mount space. Anything else, including values that fail
//! to parse, passes through untouched.

use std::net::IpAddr;

use ninsho_core::Route;
use reqwest::Url;

/// Rewrite a `Location` value, or `None` to leave it as is.
pub fn rewrite_location(location: &str, route: &Route) -> Option<String> {
    if location.starts_with("//") {
        let url = Url::parse(&format!("{}:{location}", route.protocol)).ok()?;
        return same_host_port(&url, route).then(|| remap_url(&url, route));
    }

    if location.starts_with('/') {
        let (path, suffix) = split_suffix(location);
        if within_mount(path, &route.path) {
            return None;
        }
        return Some(format!("{}{suffix}", remap_path(path, route)));
    }

    match Url::parse(location) {
        Ok(url) => {
            let same_origin = url.scheme() == route.protocol.as_str() && same_host_port(&url, route);
            same_origin.then(|| remap_url(&url, route))
        }
        Err(_) if !has_scheme(location) => Some(rewrite_bare(location, route)),
        Err(_) => None,
    }
}

/// Whether a `:` appears before the first `/`, `?` or `#`.
fn has_scheme(location: &str) -> bool {
    location
        .split(['/', '?', '#'])
        .next()
        .is_some_and(|head| head.contains(':'))
}

/// Whether `url` names the route's backend by host and port.
///
/// The host matches either `target_ip` (compared as an address, so any
/// IPv6 spelling works) or the route's `sni`.
fn same_host_port(url: &Url, route: &Route) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    let host_matches = match bare.parse::<IpAddr>() {
        Ok(ip) => ip == route.target_ip,
        Err(_) => route
            .sni
            .as_deref()
            .is_some_and(|sni| sni.eq_ignore_ascii_case(bare)),
    };

    host_matches && url.port_or_known_default() == Some(route.target_port)
}

fn remap_url(url: &Url, route: &Route) -> String {
    let mut out = remap_path(url.path(), route);
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Strip `target_path` from a backend path, then prefix the mount.
fn remap_path(path: &str, route: &Route) -> String {
    let prefix = route.target_path.trim_end_matches('/');
    let rest = if prefix.is_empty() {
        path
    } else {
        strip_segment_prefix(path, prefix).unwrap_or(path)
    };
    format!("{}{rest}", route.path)
}

fn rewrite_bare(location: &str, route: &Route) -> String {
    let prefix = route.target_path.trim_matches('/');
    if !prefix.is_empty() {
        if let Some(rest) = strip_segment_prefix(location, prefix) {
            return format!("{}{rest}", route.path);
        }
    }
    format!("{}/{location}", route.path)
}

/// `path` minus `prefix`, when `prefix` ends on a segment boundary.
fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with(['/', '?', '#'])).then_some(rest)
}

fn within_mount(path: &str, mount: &str) -> bool {
    strip_segment_prefix(path, mount).is_some()
}

/// Split `/a/b?q#f` into (`/a/b`, `?q#f`).
fn split_suffix(location: &str) -> (&str, &str) {
    match location.find(['?', '#']) {
        Some(i) => location.split_at(i),
        None => (location, ""),
    }
}
