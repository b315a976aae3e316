use thiserror::Error;

use super::SyncEngine;
use crate::feed::{FeedParser, FetchError, Fetcher, ParseError};
use crate::storage::{Feed, StoreError};
use crate::util::{parse_feed_url, validate_url, UrlValidationError};

/// Errors returned to the caller of [`subscribe`].
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Could not fetch feed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Could not parse feed: {0}")]
    Parse(#[from] ParseError),
}

/// Subscribe to a feed and register it with the engine's store.
///
/// Validates the locator, rejects URLs the store already tracks, fetches and
/// parses the feed once, then adds it with its initial posts. Adding the first
/// feed starts the engine.
///
/// With `allow_private_hosts == false` the locator must not point at
/// localhost or a private address.
///
/// # Errors
///
/// - [`SubscribeError::InvalidUrl`] for blank, relative, non-http(s) or blocked locators
/// - [`SubscribeError::Store`] with [`StoreError::DuplicateUrl`] if already tracked
/// - [`SubscribeError::Fetch`] / [`SubscribeError::Parse`] if the feed cannot be read
pub async fn subscribe<F, P>(
    engine: &SyncEngine<F, P>,
    input: &str,
    allow_private_hosts: bool,
) -> Result<Feed, SubscribeError>
where
    F: Fetcher + 'static,
    P: FeedParser + 'static,
{
    let url = if allow_private_hosts {
        parse_feed_url(input)?
    } else {
        validate_url(input)?
    };
    let original = input.trim();
    let canonical = url.as_str();

    // Cheap pre-check so duplicates never hit the network; add_feed re-checks
    ensure_untracked(engine, canonical)?;
    ensure_untracked(engine, original)?;

    tracing::debug!(url = %canonical, "Fetching feed for subscription");
    let raw = engine.fetcher().fetch(canonical).await?;
    let parsed = engine.parser().parse(&raw)?;

    let feed = Feed::new(canonical, parsed.meta).with_original_url(original);
    let (added, first) = engine.store().write(|s| {
        let id = s.add_feed(feed, parsed.posts)?;
        let first = s.feed_count() == 1;
        let added = s.get_feed(&id).cloned().ok_or(StoreError::UnknownFeed(id))?;
        Ok::<_, StoreError>((added, first))
    })?;

    tracing::info!(feed_id = %added.id, url = %added.url, title = %added.title, "Subscribed to feed");

    if first {
        engine.start();
    }
    Ok(added)
}

fn ensure_untracked<F, P>(engine: &SyncEngine<F, P>, url: &str) -> Result<(), StoreError>
where
    F: Fetcher + 'static,
    P: FeedParser + 'static,
{
    match engine.store().read(|s| s.find_feed_by_url(url).cloned()) {
        Some(existing) => Err(StoreError::DuplicateUrl {
            url: url.to_string(),
            existing,
        }),
        None => Ok(()),
    }
}
