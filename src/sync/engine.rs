use chrono::Utc;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::feed::{FeedParser, FetchError, Fetcher, ParseError, ParsedFeed};
use crate::storage::{Feed, FeedId, FeedPatch, Post, SharedStore, Store, StoreError};

/// Default delay between the end of one cycle and the start of the next.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Callback invoked with a feed and the posts a cycle just added to it.
pub type NewPostsListener = Arc<dyn Fn(&Feed, &[Post]) + Send + Sync>;

/// Engine lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Running,
    /// A cycle is executing (possibly finishing after `stop()`)
    CycleInProgress,
}

/// Diagnostic snapshot returned by [`SyncEngine::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub status: EngineStatus,
    pub cycles_completed: u64,
    pub interval: Duration,
}

/// Outcome of one pass over every feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 1-based cycle number
    pub cycle: u64,
    /// Feeds that were stamped and fetched
    pub checked: usize,
    /// Feeds that gained posts, with the number added
    pub updated: Vec<(FeedId, usize)>,
    /// Feeds whose fetch or parse failed, with the recorded error
    pub failed: Vec<(FeedId, String)>,
}

/// Why a single feed check failed. Recorded on the feed, never propagated.
#[derive(Debug, Error)]
enum CheckError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Periodically re-polls every feed in a [`SharedStore`].
///
/// Scheduling is fetch-then-wait: the interval is measured from the end of
/// one cycle to the start of the next, and the first cycle begins one interval
/// after [`start`](Self::start). Feeds are checked one at a time in store
/// order. A failing feed gets `last_error` stamped and the cycle moves on;
/// cycles themselves cannot fail.
///
/// `start` and `stop` must be called from within a tokio runtime.
pub struct SyncEngine<F, P> {
    inner: Arc<EngineInner<F, P>>,
    chain: Mutex<Option<Chain>>,
}

/// One scheduling loop. Dropping `stop_tx` (or sending `false`) ends it.
struct Chain {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct EngineInner<F, P> {
    store: SharedStore,
    fetcher: F,
    parser: P,
    interval: Duration,
    listeners: RwLock<Vec<NewPostsListener>>,
    cycles_tx: watch::Sender<u64>,
    in_cycle: AtomicBool,
    /// Serializes cycles across chains, so a restart right after `stop()`
    /// waits for the previous chain's in-flight cycle.
    cycle_lock: tokio::sync::Mutex<()>,
}

impl<F, P> SyncEngine<F, P>
where
    F: Fetcher + 'static,
    P: FeedParser + 'static,
{
    pub fn new(store: SharedStore, fetcher: F, parser: P, interval: Duration) -> Self {
        let (cycles_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(EngineInner {
                store,
                fetcher,
                parser,
                interval,
                listeners: RwLock::new(Vec::new()),
                cycles_tx,
                in_cycle: AtomicBool::new(false),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
            chain: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    pub fn parser(&self) -> &P {
        &self.inner.parser
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Register a listener for new-post notifications.
    pub fn on_new_posts(&self, listener: impl Fn(&Feed, &[Post]) + Send + Sync + 'static) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Begin periodic synchronization. A no-op when already running.
    pub fn start(&self) {
        let mut chain = self.lock_chain();
        if chain.is_some() {
            tracing::debug!("Sync engine already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(true);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run(stop_rx));
        *chain = Some(Chain { stop_tx, handle });
    }

    /// Stop scheduling further cycles.
    ///
    /// The pending wait is cancelled immediately. A cycle already in flight is
    /// not interrupted; it completes and no further cycle is scheduled.
    pub fn stop(&self) {
        if let Some(chain) = self.lock_chain().take() {
            // The loop may already have exited; nothing to signal then
            let _ = chain.stop_tx.send(false);
        }
    }

    /// Stop and wait for the scheduling loop, including any in-flight cycle, to finish.
    pub async fn shutdown(&self) {
        let chain = self.lock_chain().take();
        if let Some(chain) = chain {
            let _ = chain.stop_tx.send(false);
            if let Err(e) = chain.handle.await {
                tracing::warn!(error = %e, "Sync task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_chain().is_some()
    }

    pub fn status(&self) -> EngineStatus {
        if self.inner.in_cycle.load(Ordering::SeqCst) {
            EngineStatus::CycleInProgress
        } else if self.is_running() {
            EngineStatus::Running
        } else {
            EngineStatus::Idle
        }
    }

    /// Number of cycles completed since construction.
    pub fn cycles_completed(&self) -> u64 {
        *self.inner.cycles_tx.borrow()
    }

    /// Receiver that observes the completed-cycle counter.
    pub fn watch_cycles(&self) -> watch::Receiver<u64> {
        self.inner.cycles_tx.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            status: self.status(),
            cycles_completed: self.cycles_completed(),
            interval: self.inner.interval,
        }
    }

    /// Run one cycle now, independent of the schedule.
    ///
    /// Waits for any cycle already in flight to finish first.
    pub async fn run_cycle(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    fn lock_chain(&self) -> MutexGuard<'_, Option<Chain>> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F, P> Drop for SyncEngine<F, P> {
    fn drop(&mut self) {
        let chain = self
            .chain
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(chain) = chain {
            let _ = chain.stop_tx.send(false);
        }
    }
}

impl<F, P> EngineInner<F, P>
where
    F: Fetcher,
    P: FeedParser,
{
    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        tracing::info!(interval_ms = millis(self.interval), "Sync engine started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stopped(&mut stop_rx) => break,
            }
            if is_stopped(&stop_rx) {
                break;
            }

            self.run_cycle().await;

            if is_stopped(&stop_rx) {
                break;
            }
        }

        tracing::info!("Sync engine stopped");
    }

    async fn run_cycle(&self) -> CycleReport {
        let _serial = self.cycle_lock.lock().await;
        let _flag = CycleFlag::raise(&self.in_cycle);

        let feeds: Vec<(FeedId, String)> = self.store.read(|s| {
            s.get_all_feeds()
                .into_iter()
                .map(|f| (f.id.clone(), f.url.clone()))
                .collect()
        });

        let mut report = CycleReport::default();
        for (feed_id, url) in &feeds {
            self.check_feed(feed_id, url, &mut report).await;
        }

        let mut cycle = 0;
        self.cycles_tx.send_modify(|n| {
            *n += 1;
            cycle = *n;
        });
        report.cycle = cycle;

        tracing::info!(
            cycle = cycle,
            feeds = feeds.len(),
            checked = report.checked,
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Sync cycle complete"
        );
        report
    }

    async fn check_feed(&self, feed_id: &FeedId, url: &str, report: &mut CycleReport) {
        let stamped = self
            .store
            .write(|s| s.update_feed_metadata(feed_id, FeedPatch::checked_at(Utc::now())));
        if stamped.is_none() {
            tracing::debug!(feed_id = %feed_id, "Feed removed before its check, skipping");
            return;
        }
        report.checked += 1;
        tracing::debug!(feed_id = %feed_id, url = %url, "Checking feed");

        let parsed = match self.fetch_and_parse(url).await {
            Ok(parsed) => parsed,
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(feed_id = %feed_id, url = %url, error = %message, "Feed check failed");
                self.store
                    .write(|s| s.update_feed_metadata(feed_id, FeedPatch::failed(&message, Utc::now())));
                report.failed.push((feed_id.clone(), message));
                return;
            }
        };

        match self.store.write(|s| merge(s, feed_id, parsed)) {
            Ok((feed, added)) if !added.is_empty() => {
                tracing::info!(
                    feed_id = %feed_id,
                    title = %feed.title,
                    new_posts = added.len(),
                    "Found new posts"
                );
                report.updated.push((feed_id.clone(), added.len()));
                self.notify(&feed, &added);
            }
            Ok(_) => {
                tracing::debug!(feed_id = %feed_id, "No new posts");
            }
            Err(e) => {
                tracing::debug!(feed_id = %feed_id, error = %e, "Feed removed during its check, skipping");
            }
        }
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed, CheckError> {
        let raw = self.fetcher.fetch(url).await?;
        Ok(self.parser.parse(&raw)?)
    }

    fn notify(&self, feed: &Feed, added: &[Post]) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| listener(feed, added)));
            if delivered.is_err() {
                tracing::warn!(feed_id = %feed.id, "New-posts listener panicked, continuing");
            }
        }
    }
}

/// Merge a successful fetch under one store lock: insert unseen posts, refresh
/// reported metadata, clear the previous error and bump the counters.
fn merge(
    store: &mut Store,
    feed_id: &FeedId,
    parsed: ParsedFeed,
) -> Result<(Feed, Vec<Post>), StoreError> {
    let added = store.add_new_posts(feed_id, parsed.posts)?;

    let mut patch = FeedPatch::from_metadata(&parsed.meta);
    patch.last_error = Some(None);
    if !added.is_empty() {
        let previous = store.get_feed(feed_id).map_or(0, |f| f.new_posts_count);
        patch.last_updated = Some(Utc::now());
        patch.new_posts_count = Some(previous + added.len() as u64);
    }

    let feed = store
        .update_feed_metadata(feed_id, patch)
        .ok_or_else(|| StoreError::UnknownFeed(feed_id.clone()))?;
    Ok((feed, added))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    // Err means the engine was dropped, which also stops the loop
    let _ = stop_rx.wait_for(|running| !running).await;
}

fn is_stopped(stop_rx: &watch::Receiver<bool>) -> bool {
    stop_rx.has_changed().is_err() || !*stop_rx.borrow()
}

/// Holds `in_cycle` high for the duration of a cycle, even if the cycle
/// future is dropped part way.
struct CycleFlag<'a>(&'a AtomicBool);

impl<'a> CycleFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for CycleFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
