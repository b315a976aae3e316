//! Configuration file parser for ~/.config/tidings/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
//!
//! No mirrors are configured by default. A public-proxy fallback chain looks
//! like this (`{url}` is percent-encoded, `{raw_url}` is inserted verbatim):
//!
//! ```
//! use tidings::config::Config;
//! use tidings::feed::MirrorKind;
//!
//! let config = Config::parse(r#"
//! [[mirrors]]
//! template = "https://api.allorigins.win/get?url={url}&disableCache=true"
//! kind = "json_contents"
//!
//! [[mirrors]]
//! template = "https://cors-anywhere.herokuapp.com/{raw_url}"
//!
//! [[mirrors]]
//! template = "https://api.codetabs.com/v1/proxy?quest={url}"
//! "#).unwrap();
//!
//! assert_eq!(config.mirrors.len(), 3);
//! assert_eq!(config.mirrors[0].kind, MirrorKind::JsonContents);
//! assert_eq!(config.mirrors[1].kind, MirrorKind::Raw);
//! ```
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchError, HttpFetcher, Mirror};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between the end of one sync cycle and the start of the next.
    pub refresh_interval_secs: u64,

    /// Per-request timeout for the HTTP fetcher.
    pub fetch_timeout_secs: u64,

    pub user_agent: String,

    /// Accept localhost and private-network feed URLs.
    pub allow_private_hosts: bool,

    /// Request the feed URL itself before trying mirrors.
    pub try_direct: bool,

    /// Proxy routes tried, in order, after the direct request fails.
    pub mirrors: Vec<Mirror>,

    /// Exit after this many cycles (binary only). `None` runs until Ctrl-C.
    pub max_cycles: Option<u64>,

    /// Feed URLs subscribed at startup, before any given on the command line.
    pub feeds: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
            fetch_timeout_secs: 15,
            user_agent: "tidings/0.1".to_string(),
            allow_private_hosts: false,
            try_direct: true,
            mirrors: Vec::new(),
            max_cycles: None,
            feeds: Vec::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "refresh_interval_secs",
        "fetch_timeout_secs",
        "user_agent",
        "allow_private_hosts",
        "try_direct",
        "mirrors",
        "max_cycles",
        "feeds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            interval_secs = config.refresh_interval_secs,
            mirrors = config.mirrors.len(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text. Blank text yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// Sync interval, clamped to at least one second.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Build the HTTP fetcher described by this configuration.
    pub fn http_fetcher(&self) -> Result<HttpFetcher, FetchError> {
        Ok(HttpFetcher::with_user_agent(&self.user_agent)?
            .timeout(self.fetch_timeout())
            .try_direct(self.try_direct)
            .mirrors(self.mirrors.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
