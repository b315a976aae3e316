//! tidings: RSS/Atom aggregation core.
//!
//! A user submits a feed URL, tidings fetches and parses it, records the feed and
//! its posts in a normalized in-memory [`storage::Store`], and a
//! [`sync::SyncEngine`] periodically re-polls every known feed, merging newly
//! discovered posts without duplicating the ones it has already seen.
//!
//! # Layout
//!
//! - [`storage`] - Feed/post entity model, URL index, read marks
//! - [`feed`] - Fetcher and parser collaborators (reqwest + feed-rs defaults)
//! - [`sync`] - Submit flow and the fetch-then-wait synchronization engine
//! - [`config`] - TOML configuration
//! - [`util`] - URL validation

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
