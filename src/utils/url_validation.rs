//! URL validation for the home-automation control plane
//!
//! The control plane usually lives on the local network, so plain HTTP is
//! tolerated there. Anything reachable over the public internet must use HTTPS
//! because every request carries a long-lived bearer token.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Host suffixes that only resolve inside a home network.
const LOCAL_SUFFIXES: &[&str] = &[".local", ".lan", ".home", ".internal", ".home.arpa"];

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be http or https, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL scheme must be HTTPS for public host {0}")]
    HttpsRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not carry a query string or fragment")]
    UnexpectedQuery,
}

/// Checks if an IPv4 address is private/internal
///
/// Private addresses include:
/// - Loopback (127.0.0.0/8)
/// - Private (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16)
/// - Link-local (169.254.0.0/16)
/// - Shared (100.64.0.0/10 - CGNAT, used by some VPN overlays)
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    if ip.is_loopback() || ip.is_private() || ip.is_link_local() {
        return true;
    }
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Checks if an IPv6 address is private/internal
///
/// Covers loopback, link-local (fe80::/10), unique local (fc00::/7) and
/// IPv4-mapped private addresses.
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    let segments = ip.segments();

    // Link-local (fe80::/10)
    if segments[0] & 0xFFC0 == 0xFE80 {
        return true;
    }

    // Unique local address (fc00::/7)
    if segments[0] & 0xFE00 == 0xFC00 {
        return true;
    }

    if let Some(ipv4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&ipv4);
    }

    false
}

/// Checks if an IP address is private/internal
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_ipv6(ipv6),
    }
}

/// Whether a domain name can only be resolved inside the local network.
fn is_local_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost"
        || !domain.contains('.')
        || LOCAL_SUFFIXES.iter().any(|suffix| domain.ends_with(suffix))
}

/// Validates the control-plane base URL.
///
/// Checks performed:
/// 1. URL must be valid and parseable
/// 2. Scheme must be `http` or `https`
/// 3. URL must have a host and no query/fragment
/// 4. Plain `http` is only accepted for loopback, private IPs and local domains
///
/// Returns the parsed URL with any trailing slash removed from the path so
/// callers can append `/api/...` segments directly.
///
/// # Example
/// ```rust
/// use waav_live::utils::url_validation::validate_control_plane_url;
///
/// assert!(validate_control_plane_url("http://homeassistant.local:8123").is_ok());
/// assert!(validate_control_plane_url("https://ha.example.com").is_ok());
/// assert!(validate_control_plane_url("http://ha.example.com").is_err());
/// ```
pub fn validate_control_plane_url(url: &str) -> Result<Url, UrlValidationError> {
    let mut parsed = Url::parse(url.trim())?;

    let scheme = parsed.scheme().to_string();
    if scheme != "https" && scheme != "http" {
        return Err(UrlValidationError::UnsupportedScheme(scheme));
    }

    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedQuery);
    }

    let local = match parsed.host() {
        Some(url::Host::Ipv4(ip)) => is_private_ipv4(&ip),
        Some(url::Host::Ipv6(ip)) => is_private_ipv6(&ip),
        Some(url::Host::Domain(domain)) => is_local_domain(domain),
        None => return Err(UrlValidationError::MissingHost),
    };

    if scheme == "http" && !local {
        let host = parsed.host_str().unwrap_or_default().to_string();
        warn!(host = %host, "Refusing plain HTTP control-plane URL on a public host");
        return Err(UrlValidationError::HttpsRequired(host));
    }

    let trimmed = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&trimmed);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_private_ipv4_ranges() {
        assert!(is_private_ipv4(&Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(172, 16, 0, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(192, 168, 1, 20)));
        assert!(is_private_ipv4(&Ipv4Addr::new(169, 254, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(100, 64, 0, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(100, 128, 0, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_is_private_ipv6_ranges() {
        assert!(is_private_ipv6(&Ipv6Addr::LOCALHOST));
        assert!(is_private_ipv6(&Ipv6Addr::new(0xFE80, 0, 0, 0, 0, 0, 0, 1)));
        assert!(is_private_ipv6(&Ipv6Addr::new(0xFD00, 0, 0, 0, 0, 0, 0, 1)));
        assert!(!is_private_ipv6(&Ipv6Addr::new(
            0x2606, 0x4700, 0, 0, 0, 0, 0, 0x1111
        )));
    }

    #[test]
    fn test_http_allowed_on_local_hosts() {
        assert!(validate_control_plane_url("http://homeassistant.local:8123").is_ok());
        assert!(validate_control_plane_url("http://homeassistant:8123").is_ok());
        assert!(validate_control_plane_url("http://192.168.1.10:8123").is_ok());
        assert!(validate_control_plane_url("http://localhost:8123").is_ok());
        assert!(validate_control_plane_url("http://[::1]:8123").is_ok());
    }

    #[test]
    fn test_http_rejected_on_public_hosts() {
        assert!(matches!(
            validate_control_plane_url("http://ha.example.com"),
            Err(UrlValidationError::HttpsRequired(_))
        ));
        assert!(matches!(
            validate_control_plane_url("http://8.8.8.8"),
            Err(UrlValidationError::HttpsRequired(_))
        ));
        assert!(validate_control_plane_url("https://ha.example.com").is_ok());
    }

    #[test]
    fn test_rejects_other_schemes_and_queries() {
        assert!(matches!(
            validate_control_plane_url("ftp://homeassistant.local"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_control_plane_url("https://ha.example.com/?token=x"),
            Err(UrlValidationError::UnexpectedQuery)
        ));
        assert!(matches!(
            validate_control_plane_url("not a url"),
            Err(UrlValidationError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let url = validate_control_plane_url("https://ha.example.com/base/").unwrap();
        assert_eq!(url.path(), "/base");
        let url = validate_control_plane_url("http://homeassistant.local:8123/").unwrap();
        assert_eq!(url.as_str(), "http://homeassistant.local:8123/");
    }
}
