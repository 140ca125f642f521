//! Same-origin check for browser channel upgrades.

/// Whether an upgrade with these headers may proceed.
///
/// A missing `Origin` is allowed: only browsers send one. Otherwise the
/// origin's `host[:port]` must equal the `Host` header, with hostnames
/// compared case-insensitively and default ports filled in from the scheme.
pub fn origin_allowed(origin: Option<&str>, host: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    let Some(host) = host else {
        return false;
    };
    let Ok(url) = reqwest::Url::parse(origin) else {
        return false;
    };
    let Some(origin_host) = url.host_str() else {
        return false;
    };
    let Some((request_host, request_port)) = split_host_port(host) else {
        return false;
    };

    let origin_host = origin_host.trim_start_matches('[').trim_end_matches(']');
    if !origin_host.eq_ignore_ascii_case(request_host) {
        return false;
    }
    // A Host without a port means the scheme default.
    let origin_port = url.port_or_known_default();
    match request_port {
        Some(port) => origin_port == Some(port),
        None => url.port().is_none(),
    }
}

/// Split a `Host` header value into host and optional port.
/// IPv6 literals keep their brackets stripped: `[::1]:80` -> (`::1`, 80).
fn split_host_port(value: &str) -> Option<(&str, Option<u16>)> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(rest) = value.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after {
            "" => Some((host, None)),
            _ => Some((host, Some(after.strip_prefix(':')?.parse().ok()?))),
        };
    }
    match value.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((value, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_origin_is_allowed() {
        assert!(origin_allowed(None, Some("relay.example.com")));
        assert!(origin_allowed(None, None));
    }

    #[test]
    fn same_host_is_allowed() {
        assert!(origin_allowed(Some("https://relay.example.com"), Some("relay.example.com")));
        assert!(origin_allowed(Some("http://localhost:3000"), Some("localhost:3000")));
        assert!(origin_allowed(Some("https://Relay.Example.com"), Some("relay.example.COM")));
    }

    #[test]
    fn default_port_matches_explicit_port() {
        assert!(origin_allowed(Some("https://relay.example.com"), Some("relay.example.com:443")));
        assert!(origin_allowed(Some("http://relay.example.com:80"), Some("relay.example.com")));
    }

    #[test]
    fn different_host_is_rejected() {
        assert!(!origin_allowed(Some("https://evil.example.com"), Some("relay.example.com")));
        assert!(!origin_allowed(Some("http://localhost:3001"), Some("localhost:3000")));
        assert!(!origin_allowed(Some("http://localhost"), Some("localhost:3000")));
    }

    #[test]
    fn substring_tricks_are_rejected() {
        assert!(!origin_allowed(
            Some("https://relay.example.com.evil.net"),
            Some("relay.example.com")
        ));
        assert!(!origin_allowed(
            Some("https://evil.net/relay.example.com"),
            Some("relay.example.com")
        ));
        assert!(!origin_allowed(Some("https://com"), Some("relay.example.com")));
    }

    #[test]
    fn unparseable_values_are_rejected() {
        assert!(!origin_allowed(Some("null"), Some("relay.example.com")));
        assert!(!origin_allowed(Some(""), Some("relay.example.com")));
        assert!(!origin_allowed(Some("https://relay.example.com"), None));
        assert!(!origin_allowed(Some("https://relay.example.com"), Some("relay.example.com:http")));
    }

    #[test]
    fn ipv6_hosts() {
        assert!(origin_allowed(Some("http://[::1]:3000"), Some("[::1]:3000")));
        assert!(!origin_allowed(Some("http://[::1]:3000"), Some("[::2]:3000")));
        assert_eq!(split_host_port("[::1]"), Some(("::1", None)));
        assert_eq!(split_host_port("[::1]:80"), Some(("::1", Some(80))));
        assert_eq!(split_host_port("[::1]x"), None);
    }
}
