//! Feed retrieval and parsing collaborators.
//!
//! The sync engine only talks to the [`Fetcher`] and [`FeedParser`] traits:
//!
//! - **Fetching**: [`HttpFetcher`] issues the direct request, then falls back
//!   to configured [`Mirror`]s, returning the first usable payload
//! - **Parsing**: [`FeedRsParser`] turns RSS/Atom text into a [`ParsedFeed`]
//!   with `feed-rs`, rejecting HTML and JSON payloads
//!
//! # Example
//!
//! ```ignore
//! use tidings::feed::{FeedParser, FeedRsParser, Fetcher, HttpFetcher};
//!
//! let fetcher = HttpFetcher::with_user_agent("tidings/0.1")?;
//! let raw = fetcher.fetch("https://example.com/rss.xml").await?;
//! let parsed = FeedRsParser.parse(&raw)?;
//! ```

mod fetcher;
mod parser;

pub use fetcher::{FetchError, Fetcher, HttpFetcher, Mirror, MirrorKind};
pub use parser::{FeedParser, FeedRsParser, ParseError, ParsedFeed};
