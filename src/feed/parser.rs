use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use thiserror::Error;

use crate::storage::{FeedMetadata, PostRecord};

const UNTITLED_FEED: &str = "Untitled Feed";
const UNTITLED_POST: &str = "Untitled Post";
const DEFAULT_LANGUAGE: &str = "en";

/// Errors raised while turning raw payload text into feed records.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is something other than RSS/Atom (HTML page, JSON, plain text)
    #[error("Not a feed: {0}")]
    NotAFeed(String),
    /// The payload looked like XML but could not be parsed as RSS or Atom
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

/// Feed metadata plus its posts, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub meta: FeedMetadata,
    pub posts: Vec<PostRecord>,
}

/// Turns raw feed text into a [`ParsedFeed`]. Implementations must be pure.
pub trait FeedParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<ParsedFeed, ParseError>;
}

/// RSS 0.9x/1.0/2.0 and Atom parser backed by `feed-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedRsParser;

impl FeedParser for FeedRsParser {
    fn parse(&self, raw: &str) -> Result<ParsedFeed, ParseError> {
        let body = sniff(raw)?;
        let feed = parser::parse(body.as_bytes()).map_err(|e| ParseError::Malformed(e.to_string()))?;

        let meta = FeedMetadata {
            title: feed
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED_FEED.to_string()),
            description: feed
                .description
                .map(|d| d.content.trim().to_string())
                .unwrap_or_default(),
            link: preferred_link(&feed.links).unwrap_or_default(),
            language: feed
                .language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            last_build_date: feed.updated.or(feed.published),
        };

        let posts = feed.entries.into_iter().map(post_record).collect();

        Ok(ParsedFeed { meta, posts })
    }
}

/// Reject payloads that are obviously not XML before handing them to feed-rs,
/// which would otherwise accept JSON Feed documents.
fn sniff(raw: &str) -> Result<&str, ParseError> {
    let body = raw.trim_start_matches('\u{feff}').trim();
    let head: String = body.chars().take(16).collect::<String>().to_lowercase();

    if body.is_empty() {
        return Err(ParseError::NotAFeed("empty payload".to_string()));
    }
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Err(ParseError::NotAFeed(
            "received an HTML page instead of RSS/Atom".to_string(),
        ));
    }
    if head.starts_with('{') || head.starts_with('[') {
        return Err(ParseError::NotAFeed(
            "received JSON instead of RSS/Atom".to_string(),
        ));
    }
    if !head.starts_with('<') {
        return Err(ParseError::NotAFeed(
            "payload does not start with an XML tag".to_string(),
        ));
    }

    Ok(body)
}

fn post_record(entry: Entry) -> PostRecord {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_POST.to_string());

    // RSS items without <link> often carry a permalink guid instead
    let link = preferred_link(&entry.links).or_else(|| {
        let id = entry.id.trim();
        (id.starts_with("http://") || id.starts_with("https://")).then(|| id.to_string())
    });

    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let author = entry
        .authors
        .into_iter()
        .map(|a| a.name.trim().to_string())
        .find(|name| !name.is_empty());

    let category = entry
        .categories
        .into_iter()
        .map(|c| c.term.trim().to_string())
        .find(|term| !term.is_empty());

    PostRecord {
        title,
        link,
        description,
        pub_date: entry.published.or(entry.updated),
        author,
        category,
    }
}

/// `rel="alternate"` wins, otherwise the first link.
fn preferred_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}
