//! Normalized in-memory feed store.
//!
//! - [`Store`] - feeds, posts, feed membership, URL index, read marks
//! - [`SharedStore`] - cloneable handle shared by the submit flow and the sync engine
//! - [`normalize_url`] - the canonical form used for duplicate detection

mod shared;
mod store;
mod types;
mod url_index;

pub use shared::SharedStore;
pub use store::Store;
pub use types::{
    Feed, FeedId, FeedMetadata, FeedPatch, FeedStats, Post, PostId, PostRecord, StoreError,
    StoreStats,
};
pub use url_index::normalize_url;
