use std::collections::HashMap;
use url::Url;

use super::types::FeedId;

/// Canonical form of a feed locator used for duplicate detection.
///
/// Parseable URLs reduce to `scheme://host/path`, lower-cased with trailing
/// slashes removed; query, fragment and port are ignored. Anything `url` cannot
/// parse falls back to the trimmed, lower-cased literal.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) => format!(
            "{}://{}{}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.path()
        )
        .trim_end_matches('/')
        .to_lowercase(),
        Err(_) => trimmed.to_lowercase(),
    }
}

/// Normalized URL -> owning feed.
#[derive(Debug, Default)]
pub(crate) struct UrlIndex {
    entries: HashMap<String, FeedId>,
}

impl UrlIndex {
    pub(crate) fn lookup(&self, url: &str) -> Option<&FeedId> {
        let key = normalize_url(url);
        if key.is_empty() {
            return None;
        }
        self.entries.get(&key)
    }

    pub(crate) fn insert(&mut self, url: &str, feed_id: FeedId) {
        let key = normalize_url(url);
        if !key.is_empty() {
            self.entries.insert(key, feed_id);
        }
    }

    /// Drop every entry pointing at `feed_id`.
    pub(crate) fn remove_feed(&mut self, feed_id: &FeedId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, owner| owner != feed_id);
        before - self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
