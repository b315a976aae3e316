use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Structural errors returned synchronously by [`Store`](super::Store) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The feed record is missing its identity or locator
    #[error("Invalid feed: {0}")]
    InvalidFeed(String),

    /// The feed's URL (or original URL) is already tracked
    #[error("Feed already exists: {url} (tracked as {existing})")]
    DuplicateUrl { url: String, existing: FeedId },

    /// The operation referenced a feed id that is not registered
    #[error("Unknown feed: {0}")]
    UnknownFeed(FeedId),
}

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random (UUIDv4) identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// Opaque feed identity, generated when the feed is created.
    FeedId
);

opaque_id!(
    /// Opaque post identity, generated when the post is first stored.
    PostId
);

// ============================================================================
// Parser Output
// ============================================================================

/// Feed-level metadata extracted by a [`FeedParser`](crate::feed::FeedParser).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMetadata {
    pub title: String,
    pub description: String,
    /// Link to the website the feed belongs to
    pub link: String,
    pub language: String,
    /// Feed-reported freshness marker (RSS `lastBuildDate`, Atom `updated`)
    pub last_build_date: Option<DateTime<Utc>>,
}

/// A post as extracted from feed content, before it has an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostRecord {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub category: Option<String>,
}

// ============================================================================
// Entities
// ============================================================================

/// A subscribed feed.
///
/// `url` is the locator the sync engine fetches; `original_url` is the string
/// the user typed. Both are indexed for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: FeedId,
    pub url: String,
    pub original_url: Option<String>,
    pub title: String,
    pub description: String,
    pub link: String,
    pub language: String,
    pub last_build_date: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    /// Running total of posts discovered by the sync engine
    pub new_posts_count: u64,
}

impl Feed {
    /// Create a feed with a fresh id from parsed metadata.
    pub fn new(url: impl Into<String>, meta: FeedMetadata) -> Self {
        Self {
            id: FeedId::generate(),
            url: url.into(),
            original_url: None,
            title: meta.title,
            description: meta.description,
            link: meta.link,
            language: meta.language,
            last_build_date: meta.last_build_date,
            added_at: Utc::now(),
            last_checked: None,
            last_updated: None,
            last_error: None,
            last_error_time: None,
            new_posts_count: 0,
        }
    }

    pub fn with_original_url(mut self, original_url: impl Into<String>) -> Self {
        self.original_url = Some(original_url.into());
        self
    }
}

/// A single article/entry belonging to exactly one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: PostId,
    pub feed_id: FeedId,
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub category: Option<String>,
}

impl Post {
    pub(crate) fn from_record(id: PostId, feed_id: FeedId, record: PostRecord) -> Self {
        Self {
            id,
            feed_id,
            title: record.title,
            link: record.link,
            description: record.description,
            pub_date: record.pub_date,
            author: record.author,
            category: record.category,
        }
    }

    /// Dedup rule: same non-empty link, or same (title, pub_date) pair.
    pub fn is_same_as(&self, record: &PostRecord) -> bool {
        let same_link = match (self.link.as_deref(), record.link.as_deref()) {
            (Some(a), Some(b)) => !a.trim().is_empty() && a == b,
            _ => false,
        };
        same_link || (self.title == record.title && self.pub_date == record.pub_date)
    }
}

// ============================================================================
// Partial Updates
// ============================================================================

/// Shallow patch applied by [`Store::update_feed_metadata`](super::Store::update_feed_metadata).
///
/// `None` leaves a field untouched. `last_error` is doubly optional so a patch
/// can clear a previous error with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub language: Option<String>,
    pub last_build_date: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub new_posts_count: Option<u64>,
}

impl FeedPatch {
    pub fn checked_at(at: DateTime<Utc>) -> Self {
        Self {
            last_checked: Some(at),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            last_error: Some(Some(error.into())),
            last_error_time: Some(at),
            ..Self::default()
        }
    }

    /// Refresh reported metadata, skipping fields the feed left empty.
    pub fn from_metadata(meta: &FeedMetadata) -> Self {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_owned());
        Self {
            title: non_empty(&meta.title),
            description: non_empty(&meta.description),
            link: non_empty(&meta.link),
            language: non_empty(&meta.language),
            last_build_date: meta.last_build_date,
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, feed: &mut Feed) {
        if let Some(title) = self.title {
            feed.title = title;
        }
        if let Some(description) = self.description {
            feed.description = description;
        }
        if let Some(link) = self.link {
            feed.link = link;
        }
        if let Some(language) = self.language {
            feed.language = language;
        }
        if self.last_build_date.is_some() {
            feed.last_build_date = self.last_build_date;
        }
        if self.last_checked.is_some() {
            feed.last_checked = self.last_checked;
        }
        if self.last_updated.is_some() {
            feed.last_updated = self.last_updated;
        }
        if let Some(error) = self.last_error {
            feed.last_error = error;
        }
        if self.last_error_time.is_some() {
            feed.last_error_time = self.last_error_time;
        }
        if let Some(count) = self.new_posts_count {
            feed.new_posts_count = count;
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-feed counters reported by [`Store::stats`](super::Store::stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub feed_id: FeedId,
    pub title: String,
    pub post_count: usize,
    pub unread_count: usize,
}

/// Snapshot of store contents, in feed insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_feeds: usize,
    pub total_posts: usize,
    pub read_posts: usize,
    pub feeds: Vec<FeedStats>,
}
