use std::collections::{HashMap, HashSet};

use super::types::{
    Feed, FeedId, FeedPatch, FeedStats, Post, PostId, PostRecord, StoreError, StoreStats,
};
use super::url_index::UrlIndex;

/// Authoritative in-memory model of feeds, posts and read marks.
///
/// Every public method leaves the store consistent: each post references a
/// registered feed, every registered feed has a membership entry, and no
/// normalized URL maps to two feeds. Validation always runs before mutation,
/// so a failed call leaves nothing behind.
#[derive(Debug, Default)]
pub struct Store {
    feeds: HashMap<FeedId, Feed>,
    /// Feed insertion order for `get_all_feeds` and the sync engine
    feed_order: Vec<FeedId>,
    posts: HashMap<PostId, Post>,
    /// Post ids per feed, in insertion order
    memberships: HashMap<FeedId, Vec<PostId>>,
    urls: UrlIndex,
    read_posts: HashSet<PostId>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a feed along with its initial posts.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidFeed`] if the feed has no id or no url, or the id is taken
    /// - [`StoreError::DuplicateUrl`] if `url` or `original_url` is already tracked
    pub fn add_feed(&mut self, feed: Feed, posts: Vec<PostRecord>) -> Result<FeedId, StoreError> {
        if feed.id.is_empty() {
            return Err(StoreError::InvalidFeed("feed has no id".to_string()));
        }
        if feed.url.trim().is_empty() {
            return Err(StoreError::InvalidFeed(format!("feed {} has no url", feed.id)));
        }
        if self.feeds.contains_key(&feed.id) {
            return Err(StoreError::InvalidFeed(format!(
                "feed id {} is already registered",
                feed.id
            )));
        }

        let locators = std::iter::once(feed.url.as_str()).chain(feed.original_url.as_deref());
        for locator in locators {
            if let Some(existing) = self.urls.lookup(locator) {
                return Err(StoreError::DuplicateUrl {
                    url: locator.to_string(),
                    existing: existing.clone(),
                });
            }
        }

        let feed_id = feed.id.clone();
        self.urls.insert(&feed.url, feed_id.clone());
        if let Some(original) = feed.original_url.as_deref() {
            self.urls.insert(original, feed_id.clone());
        }
        self.feed_order.push(feed_id.clone());
        self.feeds.insert(feed_id.clone(), feed);
        self.memberships.insert(feed_id.clone(), Vec::new());

        let stored = self.insert_unseen(&feed_id, posts);
        tracing::debug!(feed_id = %feed_id, posts = stored.len(), "Feed registered");

        Ok(feed_id)
    }

    pub fn get_feed(&self, feed_id: &FeedId) -> Option<&Feed> {
        self.feeds.get(feed_id)
    }

    /// All feeds in insertion order.
    pub fn get_all_feeds(&self) -> Vec<&Feed> {
        self.feed_order
            .iter()
            .filter_map(|id| self.feeds.get(id))
            .collect()
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Whether `url` normalizes to a locator that is already tracked.
    pub fn has_url(&self, url: &str) -> bool {
        self.urls.lookup(url).is_some()
    }

    /// The feed tracking `url` (or a variant differing only in case or trailing slash).
    pub fn find_feed_by_url(&self, url: &str) -> Option<&FeedId> {
        self.urls.lookup(url)
    }

    /// Shallow-merge `patch` into the feed. Returns `None` for unknown feeds.
    pub fn update_feed_metadata(&mut self, feed_id: &FeedId, patch: FeedPatch) -> Option<Feed> {
        let feed = self.feeds.get_mut(feed_id)?;
        patch.apply(feed);
        Some(feed.clone())
    }

    /// Remove a feed together with its posts, membership and URL index entries.
    ///
    /// Read marks on the removed posts are left in place; they no longer match
    /// any post and are harmless.
    pub fn remove_feed(&mut self, feed_id: &FeedId) -> bool {
        if self.feeds.remove(feed_id).is_none() {
            return false;
        }

        self.feed_order.retain(|id| id != feed_id);
        let post_ids = self.memberships.remove(feed_id).unwrap_or_default();
        for post_id in &post_ids {
            self.posts.remove(post_id);
        }
        let urls = self.urls.remove_feed(feed_id);

        tracing::debug!(
            feed_id = %feed_id,
            posts = post_ids.len(),
            urls = urls,
            "Feed removed"
        );
        true
    }

    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Posts of a feed in insertion order; empty if the feed is unknown.
    pub fn get_feed_posts(&self, feed_id: &FeedId) -> Vec<&Post> {
        self.memberships
            .get(feed_id)
            .map(|ids| ids.iter().filter_map(|id| self.posts.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_post(&self, post_id: &PostId) -> Option<&Post> {
        self.posts.get(post_id)
    }

    /// Every post, grouped by feed in feed insertion order.
    pub fn get_all_posts(&self) -> Vec<&Post> {
        self.feed_order
            .iter()
            .flat_map(|id| self.get_feed_posts(id))
            .collect()
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    /// Merge candidates into a feed, skipping posts it has already seen.
    ///
    /// Returns the posts actually inserted, in candidate order. A candidate is
    /// a duplicate when it shares a non-empty link, or both title and publish
    /// date, with a post already in the feed (including earlier candidates of
    /// the same call).
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownFeed`] if `feed_id` is not registered.
    pub fn add_new_posts(
        &mut self,
        feed_id: &FeedId,
        candidates: Vec<PostRecord>,
    ) -> Result<Vec<Post>, StoreError> {
        if !self.feeds.contains_key(feed_id) {
            return Err(StoreError::UnknownFeed(feed_id.clone()));
        }
        Ok(self.insert_unseen(feed_id, candidates))
    }

    fn insert_unseen(&mut self, feed_id: &FeedId, candidates: Vec<PostRecord>) -> Vec<Post> {
        let mut added = Vec::new();

        for record in candidates {
            let seen = self.memberships.get(feed_id).is_some_and(|ids| {
                ids.iter()
                    .filter_map(|id| self.posts.get(id))
                    .any(|existing| existing.is_same_as(&record))
            });
            if seen {
                continue;
            }

            let post = Post::from_record(PostId::generate(), feed_id.clone(), record);
            self.posts.insert(post.id.clone(), post.clone());
            self.memberships
                .entry(feed_id.clone())
                .or_default()
                .push(post.id.clone());
            added.push(post);
        }

        added
    }

    // ========================================================================
    // Read State
    // ========================================================================

    /// Mark a post as read. Unknown ids are accepted and simply never match.
    pub fn mark_post_as_read(&mut self, post_id: &PostId) {
        self.read_posts.insert(post_id.clone());
    }

    pub fn is_post_read(&self, post_id: &PostId) -> bool {
        self.read_posts.contains(post_id)
    }

    pub fn read_posts_count(&self) -> usize {
        self.read_posts.len()
    }

    pub fn get_unread_feed_posts(&self, feed_id: &FeedId) -> Vec<&Post> {
        self.get_feed_posts(feed_id)
            .into_iter()
            .filter(|post| !self.is_post_read(&post.id))
            .collect()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub fn stats(&self) -> StoreStats {
        let feeds = self
            .get_all_feeds()
            .into_iter()
            .map(|feed| FeedStats {
                feed_id: feed.id.clone(),
                title: feed.title.clone(),
                post_count: self.memberships.get(&feed.id).map_or(0, Vec::len),
                unread_count: self.get_unread_feed_posts(&feed.id).len(),
            })
            .collect();

        StoreStats {
            total_feeds: self.feeds.len(),
            total_posts: self.posts.len(),
            read_posts: self.read_posts.len(),
            feeds,
        }
    }

    pub fn clear(&mut self) {
        self.feeds.clear();
        self.feed_order.clear();
        self.posts.clear();
        self.memberships.clear();
        self.urls.clear();
        self.read_posts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FeedMetadata;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn test_feed(url: &str) -> Feed {
        Feed::new(
            url,
            FeedMetadata {
                title: "Test Feed".to_string(),
                description: "A feed for tests".to_string(),
                link: "https://example.com".to_string(),
                language: "en".to_string(),
                last_build_date: None,
            },
        )
    }

    fn record(link: &str, title: &str) -> PostRecord {
        PostRecord {
            title: title.to_string(),
            link: (!link.is_empty()).then(|| link.to_string()),
            ..PostRecord::default()
        }
    }

    fn dated(title: &str, day: u32) -> PostRecord {
        PostRecord {
            title: title.to_string(),
            pub_date: Utc.with_ymd_and_hms(2025, 1, day, 12, 0, 0).single(),
            ..PostRecord::default()
        }
    }

    // ------------------------------------------------------------------------
    // add_feed
    // ------------------------------------------------------------------------

    #[test]
    fn test_add_feed_round_trips_record() {
        let mut store = Store::new();
        let feed = test_feed("https://example.com/rss");
        let expected = feed.clone();

        let id = store
            .add_feed(feed, vec![record("https://example.com/1", "One")])
            .unwrap();

        assert_eq!(store.get_feed(&id), Some(&expected));
        let posts = store.get_feed_posts(&id);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "One");
        assert_eq!(posts[0].feed_id, id);
    }

    #[test]
    fn test_add_feed_without_posts_has_empty_membership() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .unwrap();

        assert!(store.get_feed_posts(&id).is_empty());
        assert_eq!(store.stats().feeds[0].post_count, 0);
    }

    #[test]
    fn test_find_feed_by_url_matches_variants() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .unwrap();

        assert_eq!(store.find_feed_by_url("HTTPS://Example.com/RSS/"), Some(&id));
        assert_eq!(store.find_feed_by_url("https://example.com/atom"), None);
    }

    #[test]
    fn test_add_feed_rejects_missing_identity() {
        let mut store = Store::new();
        let mut feed = test_feed("https://example.com/rss");
        feed.id = FeedId::from("");

        let err = store.add_feed(feed, Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFeed(_)));
        assert_eq!(store.feed_count(), 0);
        assert!(!store.has_url("https://example.com/rss"));
    }

    #[test]
    fn test_add_feed_rejects_blank_url() {
        let mut store = Store::new();
        let err = store.add_feed(test_feed("  "), Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFeed(_)));
    }

    #[test]
    fn test_add_feed_rejects_reused_id() {
        let mut store = Store::new();
        let first = test_feed("https://a.example.com/rss");
        let mut second = test_feed("https://b.example.com/rss");
        second.id = first.id.clone();

        store.add_feed(first, Vec::new()).unwrap();
        let err = store.add_feed(second, Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFeed(_)));
        assert!(!store.has_url("https://b.example.com/rss"));
    }

    #[test]
    fn test_duplicate_url_ignores_case_and_trailing_slash() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .unwrap();

        let err = store
            .add_feed(test_feed("HTTPS://EXAMPLE.COM/rss/"), Vec::new())
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateUrl {
                url: "HTTPS://EXAMPLE.COM/rss/".to_string(),
                existing: id,
            }
        );
        assert_eq!(store.feed_count(), 1);
    }

    #[test]
    fn test_duplicate_detected_through_original_url() {
        let mut store = Store::new();
        store
            .add_feed(
                test_feed("https://example.com/rss").with_original_url("example.com/rss"),
                Vec::new(),
            )
            .unwrap();

        let err = store
            .add_feed(test_feed("Example.com/RSS"), Vec::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUrl { .. }));
    }

    #[test]
    fn test_duplicate_detected_when_new_original_url_matches() {
        let mut store = Store::new();
        store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .unwrap();

        let err = store
            .add_feed(
                test_feed("https://mirror.example.org/rss")
                    .with_original_url("https://example.com/rss"),
                Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUrl { .. }));
        assert!(!store.has_url("https://mirror.example.org/rss"));
    }

    #[test]
    fn test_add_feed_dedups_initial_posts() {
        let mut store = Store::new();
        let id = store
            .add_feed(
                test_feed("https://example.com/rss"),
                vec![
                    record("https://example.com/1", "One"),
                    record("https://example.com/1", "One again"),
                ],
            )
            .unwrap();

        assert_eq!(store.get_feed_posts(&id).len(), 1);
    }

    #[test]
    fn test_get_all_feeds_preserves_insertion_order() {
        let mut store = Store::new();
        let urls = [
            "https://c.example.com/rss",
            "https://a.example.com/rss",
            "https://b.example.com/rss",
        ];
        for url in urls {
            store.add_feed(test_feed(url), Vec::new()).unwrap();
        }

        let order: Vec<&str> = store
            .get_all_feeds()
            .iter()
            .map(|f| f.url.as_str())
            .collect();
        assert_eq!(order, urls);
    }

    // ------------------------------------------------------------------------
    // add_new_posts
    // ------------------------------------------------------------------------

    #[test]
    fn test_add_new_posts_unknown_feed() {
        let mut store = Store::new();
        let missing = FeedId::from("missing");
        let err = store
            .add_new_posts(&missing, vec![record("x", "T")])
            .unwrap_err();
        assert_eq!(err, StoreError::UnknownFeed(missing));
        assert_eq!(store.post_count(), 0);
    }

    #[test]
    fn test_add_new_posts_skips_link_duplicates() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), vec![record("x", "T1")])
            .unwrap();

        let added = store
            .add_new_posts(&id, vec![record("x", "Renamed"), record("y", "T2")])
            .unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].link.as_deref(), Some("y"));
        assert_eq!(added[0].feed_id, id);
        assert_eq!(store.get_feed_posts(&id).len(), 2);
    }

    #[test]
    fn test_add_new_posts_skips_title_and_date_duplicates() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), vec![dated("Weekly", 1)])
            .unwrap();

        let added = store
            .add_new_posts(&id, vec![dated("Weekly", 1), dated("Weekly", 8)])
            .unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].pub_date, dated("Weekly", 8).pub_date);
    }

    #[test]
    fn test_empty_links_are_not_a_match() {
        let mut first = dated("Same", 1);
        first.link = Some(String::new());
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), vec![first])
            .unwrap();

        let mut candidate = dated("Same", 2);
        candidate.link = Some(String::new());
        let added = store.add_new_posts(&id, vec![candidate]).unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(store.get_feed_posts(&id).len(), 2);
    }

    #[test]
    fn test_add_new_posts_preserves_candidate_order() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .unwrap();

        let added = store
            .add_new_posts(&id, vec![record("c", "C"), record("a", "A"), record("b", "B")])
            .unwrap();

        let titles: Vec<&str> = added.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["C", "A", "B"]);
        let stored: Vec<&str> = store
            .get_feed_posts(&id)
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(stored, ["C", "A", "B"]);
    }

    #[test]
    fn test_dedup_is_scoped_to_feed() {
        let mut store = Store::new();
        let a = store
            .add_feed(test_feed("https://a.example.com/rss"), vec![record("shared", "S")])
            .unwrap();
        let b = store
            .add_feed(test_feed("https://b.example.com/rss"), Vec::new())
            .unwrap();

        let added = store.add_new_posts(&b, vec![record("shared", "S")]).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(store.get_feed_posts(&a).len(), 1);
        assert_eq!(store.get_feed_posts(&b).len(), 1);
    }

    // ------------------------------------------------------------------------
    // update / remove
    // ------------------------------------------------------------------------

    #[test]
    fn test_update_feed_metadata_merges_shallowly() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), vec![record("x", "T")])
            .unwrap();
        let checked = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();

        let updated = store
            .update_feed_metadata(&id, FeedPatch::checked_at(checked))
            .unwrap();

        assert_eq!(updated.last_checked, Some(checked));
        assert_eq!(updated.title, "Test Feed");
        assert_eq!(store.get_feed(&id), Some(&updated));
        assert_eq!(store.get_feed_posts(&id).len(), 1);
    }

    #[test]
    fn test_update_feed_metadata_can_clear_error() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .unwrap();

        store.update_feed_metadata(&id, FeedPatch::failed("boom", Utc::now()));
        assert_eq!(store.get_feed(&id).unwrap().last_error.as_deref(), Some("boom"));

        let cleared = FeedPatch {
            last_error: Some(None),
            ..FeedPatch::default()
        };
        let feed = store.update_feed_metadata(&id, cleared).unwrap();
        assert_eq!(feed.last_error, None);
        assert!(feed.last_error_time.is_some());
    }

    #[test]
    fn test_update_unknown_feed_returns_none() {
        let mut store = Store::new();
        assert!(store
            .update_feed_metadata(&FeedId::from("nope"), FeedPatch::default())
            .is_none());
    }

    #[test]
    fn test_remove_feed_cascades() {
        let mut store = Store::new();
        let id = store
            .add_feed(
                test_feed("https://example.com/rss").with_original_url("example.com/rss"),
                vec![record("x", "T1"), record("y", "T2")],
            )
            .unwrap();
        let keep = store
            .add_feed(test_feed("https://other.example.com/rss"), vec![record("z", "T3")])
            .unwrap();

        assert!(store.remove_feed(&id));

        assert!(store.get_feed(&id).is_none());
        assert!(store.get_feed_posts(&id).is_empty());
        assert!(store.get_all_posts().iter().all(|p| p.feed_id != id));
        assert_eq!(store.post_count(), 1);
        assert!(!store.has_url("https://example.com/rss"));
        assert!(!store.has_url("example.com/rss"));
        assert_eq!(store.get_all_feeds().len(), 1);
        assert_eq!(store.get_all_feeds()[0].id, keep);
    }

    #[test]
    fn test_remove_feed_frees_url_for_reregistration() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .unwrap();
        store.remove_feed(&id);

        assert!(store
            .add_feed(test_feed("https://example.com/rss"), Vec::new())
            .is_ok());
    }

    #[test]
    fn test_remove_unknown_feed() {
        let mut store = Store::new();
        assert!(!store.remove_feed(&FeedId::from("nope")));
    }

    // ------------------------------------------------------------------------
    // read state
    // ------------------------------------------------------------------------

    #[test]
    fn test_unread_posts_exclude_read_marks() {
        let mut store = Store::new();
        let id = store
            .add_feed(
                test_feed("https://example.com/rss"),
                vec![record("x", "T1"), record("y", "T2")],
            )
            .unwrap();
        let first = store.get_feed_posts(&id)[0].id.clone();

        store.mark_post_as_read(&first);

        assert!(store.is_post_read(&first));
        let unread = store.get_unread_feed_posts(&id);
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "T2");
        assert_eq!(store.stats().feeds[0].unread_count, 1);
    }

    #[test]
    fn test_read_mark_survives_feed_removal_inertly() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), vec![record("x", "T1")])
            .unwrap();
        let post_id = store.get_feed_posts(&id)[0].id.clone();

        store.mark_post_as_read(&post_id);
        store.remove_feed(&id);
        store.mark_post_as_read(&post_id);

        assert!(store.get_feed(&id).is_none());
        assert!(store.get_post(&post_id).is_none());
        assert_eq!(store.feed_count(), 0);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut store = Store::new();
        let id = store
            .add_feed(test_feed("https://example.com/rss"), vec![record("x", "T1")])
            .unwrap();
        let post_id = store.get_feed_posts(&id)[0].id.clone();
        store.mark_post_as_read(&post_id);

        store.clear();

        assert_eq!(store.feed_count(), 0);
        assert_eq!(store.post_count(), 0);
        assert_eq!(store.read_posts_count(), 0);
        assert!(!store.has_url("https://example.com/rss"));
    }

    // ------------------------------------------------------------------------
    // properties
    // ------------------------------------------------------------------------

    fn arb_record() -> impl Strategy<Value = PostRecord> {
        (
            prop::option::of("[a-e]{0,2}"),
            "[A-C]{1,2}",
            prop::option::of(1u32..5),
        )
            .prop_map(|(link, title, day)| PostRecord {
                title,
                link,
                pub_date: day.and_then(|d| Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).single()),
                ..PostRecord::default()
            })
    }

    proptest! {
        #[test]
        fn prop_add_new_posts_is_idempotent(records in prop::collection::vec(arb_record(), 0..12)) {
            let mut store = Store::new();
            let id = store.add_feed(test_feed("https://example.com/rss"), Vec::new()).unwrap();

            store.add_new_posts(&id, records.clone()).unwrap();
            let second = store.add_new_posts(&id, records).unwrap();

            prop_assert!(second.is_empty());
        }

        #[test]
        fn prop_no_two_posts_share_link_or_title_date(records in prop::collection::vec(arb_record(), 0..12)) {
            let mut store = Store::new();
            let id = store.add_feed(test_feed("https://example.com/rss"), Vec::new()).unwrap();
            store.add_new_posts(&id, records).unwrap();

            let posts = store.get_feed_posts(&id);
            for (i, a) in posts.iter().enumerate() {
                for b in posts.iter().skip(i + 1) {
                    let same_link = matches!((&a.link, &b.link), (Some(x), Some(y)) if !x.is_empty() && x == y);
                    prop_assert!(!same_link);
                    prop_assert!(!(a.title == b.title && a.pub_date == b.pub_date));
                }
            }
        }

        #[test]
        fn prop_case_and_slash_variants_are_duplicates(path in "[a-z]{1,8}", slashes in 0usize..3) {
            let mut store = Store::new();
            store.add_feed(test_feed(&format!("https://example.com/{path}")), Vec::new()).unwrap();

            let variant = format!("HTTPS://EXAMPLE.COM/{}{}", path.to_uppercase(), "/".repeat(slashes));
            let is_duplicate = matches!(
                store.add_feed(test_feed(&variant), Vec::new()),
                Err(StoreError::DuplicateUrl { .. })
            );
            prop_assert!(is_duplicate);
        }
    }
}
