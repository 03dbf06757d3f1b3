//! Boundary validators for route fields.
//!
//! The route CRUD surface runs these before a value ever reaches the relay,
//! the classifier or the synthesizer; the core assumes routes handed to it
//! already passed.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{CoreError, CoreResult};
use crate::route::Protocol;

/// The cloud instance metadata address.
pub const METADATA_IP: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^/[a-zA-Z0-9/_-]+$").expect("static pattern compiles"))
}

/// Normalize and validate a mount path.
///
/// A leading `/` is added when missing and a single trailing `/` is removed.
/// The result must contain only `[a-zA-Z0-9/_-]` and at least one character
/// after the leading slash.
pub fn normalize_path(raw: &str) -> CoreResult<String> {
    if raw.is_empty() {
        return Err(CoreError::validation("path", "Path cannot be empty"));
    }

    let mut path = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };

    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    if !path_pattern().is_match(&path) {
        return Err(CoreError::validation(
            "path",
            "Path must contain only alphanumeric characters, dash, underscore, and forward slash",
        ));
    }

    Ok(path)
}

/// Ensure a display name is non-empty after trimming.
pub fn validate_name(name: &str) -> CoreResult<String> {
    let cleaned = name.trim();
    if cleaned.is_empty() {
        return Err(CoreError::validation("name", "Name cannot be empty"));
    }
    Ok(cleaned.to_string())
}

/// Only private, non-loopback, non-metadata backends are allowed.
pub fn validate_target_ip(ip: IpAddr) -> CoreResult<()> {
    if ip.is_loopback() {
        return Err(CoreError::validation(
            "target_ip",
            "Localhost IPs are not allowed",
        ));
    }

    match ip {
        IpAddr::V4(v4) if v4 == METADATA_IP => Err(CoreError::validation(
            "target_ip",
            "Cloud metadata IP is not allowed",
        )),
        IpAddr::V4(v4) if v4.is_private() => Ok(()),
        // fc00::/7 unique local
        IpAddr::V6(v6) if (v6.segments()[0] & 0xfe00) == 0xfc00 => Ok(()),
        _ => Err(CoreError::validation(
            "target_ip",
            "Only private IP addresses are allowed (10.x.x.x, 192.168.x.x, 172.16-31.x.x)",
        )),
    }
}

/// Parse a textual IP and validate it.
pub fn parse_target_ip(raw: &str) -> CoreResult<IpAddr> {
    let ip: IpAddr = raw
        .trim()
        .parse()
        .map_err(|e| CoreError::validation("target_ip", format!("Invalid IP address: {e}")))?;
    validate_target_ip(ip)?;
    Ok(ip)
}

/// Ports are `1..=65535`.
pub fn validate_port(port: u32) -> CoreResult<u16> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or_else(|| CoreError::validation("target_port", "Port must be between 1 and 65535"))
}

/// Timeouts are positive whole seconds.
pub fn validate_timeout(timeout: u64) -> CoreResult<u64> {
    if timeout < 1 {
        return Err(CoreError::validation(
            "timeout",
            "Timeout must be a positive integer",
        ));
    }
    Ok(timeout)
}

/// Parse `http` or `https`, ignoring case and surrounding whitespace.
pub fn parse_protocol(raw: &str) -> CoreResult<Protocol> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "http" => Ok(Protocol::Http),
        "https" => Ok(Protocol::Https),
        _ => Err(CoreError::validation(
            "protocol",
            "Protocol must be either 'http' or 'https'",
        )),
    }
}

/// Normalize a backend path prefix; empty means `/`.
pub fn normalize_target_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Coerce the usual truthy spellings (`1`, `true`, `t`, `yes`, `on`).
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "t" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/jellyfin").unwrap(), "/jellyfin");
        assert_eq!(normalize_path("jellyfin").unwrap(), "/jellyfin");
        assert_eq!(normalize_path("/jellyfin/").unwrap(), "/jellyfin");
        assert_eq!(normalize_path("/media/tv_shows-2").unwrap(), "/media/tv_shows-2");
    }

    #[test]
    fn test_normalize_path_rejects_invalid() {
        assert!(normalize_path("").is_err());
        assert!(normalize_path("/").is_err());
        assert!(normalize_path("/with space").is_err());
        assert!(normalize_path("/dots.not.allowed").is_err());
        assert!(normalize_path("/query?x=1").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Jellyfin ").unwrap(), "Jellyfin");
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn test_validate_target_ip() {
        assert!(parse_target_ip("192.168.1.100").is_ok());
        assert!(parse_target_ip("10.0.0.5").is_ok());
        assert!(parse_target_ip("172.16.4.2").is_ok());
        assert!(parse_target_ip("fd00::1").is_ok());

        assert!(parse_target_ip("127.0.0.1").is_err());
        assert!(parse_target_ip("::1").is_err());
        assert!(parse_target_ip("169.254.169.254").is_err());
        assert!(parse_target_ip("8.8.8.8").is_err());
        assert!(parse_target_ip("172.32.0.1").is_err());
        assert!(parse_target_ip("not-an-ip").is_err());
    }

    #[test]
    fn test_metadata_ip_message() {
        let err = parse_target_ip("169.254.169.254").unwrap_err();
        assert!(err.to_string().contains("metadata"));
    }

    #[test]
    fn test_validate_port() {
        assert_eq!(validate_port(8096).unwrap(), 8096);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(validate_port(0).is_err());
        assert!(validate_port(65536).is_err());
    }

    #[test]
    fn test_validate_timeout() {
        assert_eq!(validate_timeout(30).unwrap(), 30);
        assert!(validate_timeout(0).is_err());
    }

    #[test]
    fn test_parse_protocol() {
        assert_eq!(parse_protocol(" HTTPS ").unwrap(), Protocol::Https);
        assert_eq!(parse_protocol("http").unwrap(), Protocol::Http);
        assert!(parse_protocol("ftp").is_err());
    }

    #[test]
    fn test_normalize_target_path() {
        assert_eq!(normalize_target_path(""), "/");
        assert_eq!(normalize_target_path("api"), "/api");
        assert_eq!(normalize_target_path("/api/v1"), "/api/v1");
    }

    #[test]
    fn test_parse_bool() {
        for truthy in ["1", "true", "T", "yes", "ON"] {
            assert!(parse_bool(truthy), "{truthy}");
        }
        for falsy in ["0", "false", "no", "off", ""] {
            assert!(!parse_bool(falsy), "{falsy}");
        }
    }

    proptest! {
        #[test]
        fn normalized_paths_are_absolute_without_trailing_slash(raw in "[a-zA-Z0-9_-]{1,12}(/[a-zA-Z0-9_-]{1,12}){0,3}/?") {
            let path = normalize_path(&raw).unwrap();
            prop_assert!(path.starts_with('/'));
            prop_assert!(!path.ends_with('/'));
            prop_assert_eq!(normalize_path(&path).unwrap(), path);
        }
    }
}
