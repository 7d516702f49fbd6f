//! Endpoint URL validation.
//!
//! Registered endpoint URLs are fetched by the gateway on behalf of admin
//! input, so every URL is screened against SSRF vectors before it is
//! accepted: private and link-local address ranges, internal hostname
//! suffixes, infrastructure ports, and userinfo tricks.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

/// Ports that never make sense for an inference backend.
const BLOCKED_PORTS: [u16; 9] = [22, 23, 25, 110, 143, 3306, 5432, 6379, 27017];

/// Hostname suffixes reserved for internal networks.
const BLOCKED_SUFFIXES: [&str; 4] = [".local", ".internal", ".lan", ".corp"];

/// Reasons a URL is rejected. Messages name the violated rule so the
/// registrant can fix the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlValidationError {
    #[error("URL failed to parse: {0}")]
    Malformed(String),

    #[error("URL scheme must be http or https, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL must contain a hostname")]
    MissingHost,

    #[error("URL hostname is blocked: {0}")]
    BlockedHost(String),

    #[error("URL resolves to a private or reserved address: {0}")]
    PrivateAddress(String),

    #[error("URL uses blocked port: {0}")]
    BlockedPort(u16),

    #[error("URL must not contain credentials")]
    CredentialsNotAllowed,
}

fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
}

fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    let segments = addr.segments();
    addr.is_loopback()
        || addr.is_unspecified()
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (segments[0] & 0xffc0) == 0xfe80
}

/// Check whether an IP address falls in a range the gateway refuses to
/// contact.
pub fn is_private_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

/// Validate an endpoint URL, rejecting anything that could reach private
/// infrastructure.
pub fn validate_url(raw: &str) -> Result<Url, UrlValidationError> {
    validate_url_with(raw, false)
}

/// Validate an endpoint URL.
///
/// `allow_private` skips the address-range and hostname-suffix checks; the
/// scheme, port, and structural checks always apply. Only test and
/// development configurations set it.
pub fn validate_url_with(raw: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw).map_err(|e| UrlValidationError::Malformed(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::CredentialsNotAllowed);
    }

    if let Some(port) = url.port() {
        if BLOCKED_PORTS.contains(&port) {
            return Err(UrlValidationError::BlockedPort(port));
        }
    }

    let host = url.host().ok_or(UrlValidationError::MissingHost)?;

    if !allow_private {
        match host {
            Host::Ipv4(addr) => {
                if is_private_ipv4(addr) {
                    return Err(UrlValidationError::PrivateAddress(addr.to_string()));
                }
            }
            Host::Ipv6(addr) => {
                if is_private_ipv6(addr) {
                    return Err(UrlValidationError::PrivateAddress(addr.to_string()));
                }
            }
            Host::Domain(domain) => {
                let lower = domain.to_lowercase();
                if lower.contains("localhost") {
                    return Err(UrlValidationError::BlockedHost(domain.to_string()));
                }
                for suffix in BLOCKED_SUFFIXES {
                    if lower.ends_with(suffix) {
                        return Err(UrlValidationError::BlockedHost(domain.to_string()));
                    }
                }
            }
        }
    }

    Ok(url)
}

/// Canonical form of an endpoint URL used for duplicate detection.
///
/// Lowercases scheme and host (the `url` crate already does both), strips
/// default ports and trailing slashes, and drops any fragment.
pub fn normalized_url(url: &Url) -> String {
    let scheme = url.scheme();
    let host = url.host_str().unwrap_or_default();

    // Url::port() is already None for the scheme default.
    let port = match url.port() {
        Some(p) => format!(":{}", p),
        None => String::new(),
    };

    let path = url.path().trim_end_matches('/');
    let query = match url.query() {
        Some(q) => format!("?{}", q),
        None => String::new(),
    };

    format!("{}://{}{}{}{}", scheme, host, port, path, query)
}

/// Whether two raw URLs name the same endpoint after normalization.
pub fn urls_equivalent(a: &Url, b: &Url) -> bool {
    normalized_url(a) == normalized_url(b)
}
