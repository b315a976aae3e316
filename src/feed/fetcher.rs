use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const ACCEPT: &str = "application/rss+xml, application/atom+xml, application/xml, text/xml, application/json;q=0.5";

/// Errors that can occur while retrieving raw feed text.
///
/// The sync engine records these on the feed and retries on the next cycle;
/// nothing here is retried immediately.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// A mirror answered with something that is not the feed itself
    /// (empty body, JSON envelope without contents, base64 data URI)
    #[error("Ambiguous payload: {0}")]
    AmbiguousPayload(String),
    /// The host could not be reached through any route
    #[error("Unreachable: {0}")]
    Unreachable(String),
}

/// Retrieves raw feed text for a URL.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// How a mirror wraps the upstream payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorKind {
    /// The response body is the feed
    #[default]
    Raw,
    /// The response body is `{"contents": "<feed text>", ...}`
    JsonContents,
}

/// A proxy route tried after the direct request fails.
///
/// `template` contains `{url}` (replaced with the percent-encoded feed URL)
/// or `{raw_url}` (replaced verbatim).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Mirror {
    pub template: String,
    #[serde(default)]
    pub kind: MirrorKind,
}

impl Mirror {
    pub fn new(template: impl Into<String>, kind: MirrorKind) -> Self {
        Self {
            template: template.into(),
            kind,
        }
    }

    fn target(&self, url: &str) -> String {
        self.template
            .replace("{url}", &urlencoding::encode(url))
            .replace("{raw_url}", url)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    contents: Option<String>,
}

/// reqwest-backed [`Fetcher`] with mirror fallback.
///
/// Tries the feed URL directly (unless disabled), then every mirror in order,
/// and returns the first usable payload. When every route fails the last
/// error is returned.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    mirrors: Vec<Mirror>,
    try_direct: bool,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            mirrors: Vec::new(),
            try_direct: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a client with the given user agent.
    pub fn with_user_agent(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self::new(client))
    }

    pub fn mirrors(mut self, mirrors: Vec<Mirror>) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn try_direct(mut self, try_direct: bool) -> Self {
        self.try_direct = try_direct;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_route(&self, target: &str, kind: MirrorKind) -> Result<String, FetchError> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .get(target)
                .header(reqwest::header::ACCEPT, ACCEPT)
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(classify)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_FEED_SIZE))
            .await
            .map_err(|_| FetchError::Timeout)??;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        let payload = match kind {
            MirrorKind::Raw => body,
            MirrorKind::JsonContents => unwrap_envelope(&body)?,
        };
        check_payload(payload)
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let direct = self
            .try_direct
            .then(|| (url.to_string(), MirrorKind::Raw));
        let routes = direct
            .into_iter()
            .chain(self.mirrors.iter().map(|m| (m.target(url), m.kind)));

        let mut last_error = None;
        for (target, kind) in routes {
            match self.fetch_route(&target, kind).await {
                Ok(body) => {
                    tracing::debug!(url = %url, route = %target, bytes = body.len(), "Fetched feed");
                    return Ok(body);
                }
                Err(e) => {
                    tracing::debug!(url = %url, route = %target, error = %e, "Fetch route failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FetchError::Unreachable(format!("no fetch routes configured for {url}"))
        }))
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

fn unwrap_envelope(body: &str) -> Result<String, FetchError> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| {
        FetchError::AmbiguousPayload(format!("mirror did not return a JSON envelope: {e}"))
    })?;
    envelope
        .contents
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| FetchError::AmbiguousPayload("JSON envelope has no contents".to_string()))
}

/// Payloads we refuse to guess at: empty bodies and base64 data URIs.
fn check_payload(payload: String) -> Result<String, FetchError> {
    let head = payload.trim_start();
    if head.is_empty() {
        return Err(FetchError::AmbiguousPayload("empty response body".to_string()));
    }
    if head.starts_with("data:") {
        return Err(FetchError::AmbiguousPayload(
            "response is a data URI, not feed text".to_string(),
        ));
    }
    Ok(payload)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
