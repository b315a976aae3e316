//! Background synchronization.
//!
//! - [`SyncEngine`] - fetch-then-wait scheduler that re-polls every feed in a
//!   [`SharedStore`](crate::storage::SharedStore) and reports new posts
//! - [`subscribe`] - the submit flow: validate, fetch, parse, register, and
//!   start the engine on the first feed

mod engine;
mod subscribe;

pub use engine::{
    CycleReport, EngineStats, EngineStatus, NewPostsListener, SyncEngine, DEFAULT_INTERVAL,
};
pub use subscribe::{subscribe, SubscribeError};
