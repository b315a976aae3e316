use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a submitted feed URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    /// Nothing was submitted.
    #[error("URL is required")]
    Empty,
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Parses a submitted feed locator and checks its scheme.
///
/// Surrounding whitespace is ignored. Only `http` and `https` are accepted.
pub fn parse_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let trimmed = url_str.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = Url::parse(trimmed)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Validates a URL string for use as a feed source.
///
/// Everything [`parse_feed_url`] checks, plus SSRF protection: rejects
/// localhost and private, link-local or unspecified IP literals.
///
/// # Examples
///
/// ```
/// use tidings::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = parse_feed_url(url_str)?;

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
