//! Bridge endpoint normalization.

/// Normalize a bridge endpoint string down to `host[:port]`.
///
/// Strips surrounding whitespace, an `http://` or `https://` prefix, and a
/// trailing `/metrics` or `/`. The result is what fetches dial and what
/// duplicate detection compares.
pub fn normalize_endpoint(raw: &str) -> String {
    let mut s = raw.trim();

    if let Some(rest) = s.strip_prefix("https://") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("http://") {
        s = rest;
    }

    let mut s = s.to_string();
    loop {
        if let Some(rest) = s.strip_suffix('/') {
            s = rest.to_string();
        } else if let Some(rest) = s.strip_suffix("/metrics") {
            s = rest.to_string();
        } else {
            break;
        }
    }

    s
}

/// Split a normalized endpoint into host and port, defaulting to 80.
pub fn endpoint_host_port(endpoint: &str) -> (String, u16) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (endpoint.to_string(), 80),
        },
        None => (endpoint.to_string(), 80),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_scheme_and_path() {
        assert_eq!(normalize_endpoint("http://h1/metrics"), "h1");
        assert_eq!(normalize_endpoint("https://h1:9090/metrics"), "h1:9090");
        assert_eq!(normalize_endpoint("h2:9090/metrics/"), "h2:9090");
        assert_eq!(normalize_endpoint("  h1:9090  "), "h1:9090");
        assert_eq!(normalize_endpoint("h3:9090/"), "h3:9090");
    }

    #[test]
    fn test_normalize_distinct_ports() {
        // Same host with and without an explicit port stays distinct.
        assert_ne!(
            normalize_endpoint("http://h1/metrics"),
            normalize_endpoint("h1:9090")
        );
    }

    #[test]
    fn test_host_port_split() {
        assert_eq!(endpoint_host_port("h1:9090"), ("h1".to_string(), 9090));
        assert_eq!(endpoint_host_port("h1"), ("h1".to_string(), 80));
    }
}
