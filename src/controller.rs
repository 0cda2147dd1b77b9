//! # Feed Controller
//! Owns one [`FeedBuffer`] and decides when and how to fetch more.
//!
//! Phases: `Empty → Loading → Ready ⇄ LoadingMore`, `Empty|Loading → Error`,
//! `Error → Loading` on retry, anything `→ Empty` on [`FeedController::reset`].
//!
//! Concurrency model: every operation takes the state lock only for short
//! synchronous sections, never across an `.await`. Each fetch is tagged with
//! the epoch it started in; `reset` bumps the epoch, so a result that comes
//! back afterwards is discarded instead of being merged into the new session.
//! Initial load and load-more share one in-flight slot (the phase), refresh
//! has its own flag because it only ever touches the head.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;

use crate::collection::FeedBuffer;
use crate::config::FeedConfig;
use crate::error::{FetchError, FetchErrorKind};
use crate::post::{Post, PostId, Session};
use crate::source::{Batch, FeedSource, PaginationStrategy};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(describe_metrics);
}

fn describe_metrics() {
    describe_counter!("feed_fetch_total", "Feed source calls issued, by operation.");
    describe_counter!(
        "feed_fetch_errors_total",
        "Feed source calls that failed, by operation and error kind."
    );
    describe_counter!(
        "feed_posts_inserted_total",
        "Posts merged into the feed buffer."
    );
    describe_counter!(
        "feed_posts_duplicate_total",
        "Fetched posts skipped because their id was already present."
    );
    describe_counter!(
        "feed_requests_dropped_total",
        "Operations rejected without a fetch (in flight, no more, wrong phase)."
    );
    describe_counter!(
        "feed_stale_results_total",
        "Fetch results discarded because the feed was reset meanwhile."
    );
    describe_histogram!("feed_fetch_ms", "Feed source call latency in milliseconds.");
    describe_counter!(
        "feed_triggers_total",
        "Inbound triggers dispatched, by trigger."
    );
    describe_gauge!("feed_size", "Posts currently held in the feed buffer.");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPhase {
    Empty,
    Loading,
    Ready,
    LoadingMore,
    Error,
}

/// Status of the pagination fetch slot, as the view layer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    InFlight,
    Error,
}

impl FeedPhase {
    pub fn fetch_status(self) -> FetchStatus {
        match self {
            Self::Loading | Self::LoadingMore => FetchStatus::InFlight,
            Self::Error => FetchStatus::Error,
            Self::Empty | Self::Ready => FetchStatus::Idle,
        }
    }

    fn has_content(self) -> bool {
        matches!(self, Self::Ready | Self::LoadingMore)
    }
}

/// Where the next load-more continues from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pagination {
    Offset { next_page: u32 },
    Cursor { last_id: Option<PostId> },
}

/// Concrete call a pagination state translates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRequest {
    Page(u32),
    After(Option<PostId>),
}

impl Pagination {
    pub fn initial(strategy: PaginationStrategy) -> Self {
        match strategy {
            PaginationStrategy::Offset => Self::Offset { next_page: 0 },
            PaginationStrategy::Cursor => Self::Cursor { last_id: None },
        }
    }

    pub fn request(&self) -> PageRequest {
        match *self {
            Self::Offset { next_page } => PageRequest::Page(next_page),
            Self::Cursor { last_id } => PageRequest::After(last_id),
        }
    }

    /// Move forward past `batch`. Never moves backwards.
    pub fn advance(&mut self, batch: &Batch) {
        match self {
            Self::Offset { next_page } => *next_page = next_page.saturating_add(1),
            Self::Cursor { last_id } => {
                if let Some(p) = batch.items.last() {
                    *last_id = Some(p.id);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The same class of fetch is already running.
    InFlight,
    /// The source reported no older posts.
    NoMore,
    /// Operation not allowed in the current phase.
    NotReady,
}

impl DropReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::NoMore => "no_more",
            Self::NotReady => "not_ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Applied { inserted: usize },
    Dropped { reason: DropReason },
    /// The feed was reset while the fetch was running; result discarded.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorView {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl From<&FetchError> for ErrorView {
    fn from(e: &FetchError) -> Self {
        Self {
            kind: e.kind(),
            message: e.cause().to_string(),
        }
    }
}

/// Everything a renderer needs, published after each transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedView {
    pub posts: Vec<Post>,
    pub phase: FeedPhase,
    pub fetch_status: FetchStatus,
    pub has_more: bool,
    pub refreshing: bool,
    pub last_error: Option<ErrorView>,
    pub epoch: u64,
}

#[derive(Debug)]
struct Inner {
    buffer: FeedBuffer,
    phase: FeedPhase,
    pagination: Pagination,
    has_more: bool,
    refreshing: bool,
    epoch: u64,
    last_error: Option<FetchError>,
}

impl Inner {
    fn new(strategy: PaginationStrategy) -> Self {
        Self {
            buffer: FeedBuffer::new(),
            phase: FeedPhase::Empty,
            pagination: Pagination::initial(strategy),
            has_more: false,
            refreshing: false,
            epoch: 0,
            last_error: None,
        }
    }

    fn view(&self) -> FeedView {
        FeedView {
            posts: self.buffer.snapshot(),
            phase: self.phase,
            fetch_status: self.phase.fetch_status(),
            has_more: self.has_more,
            refreshing: self.refreshing,
            last_error: self.last_error.as_ref().map(ErrorView::from),
            epoch: self.epoch,
        }
    }
}

pub struct FeedController {
    source: Arc<dyn FeedSource>,
    strategy: PaginationStrategy,
    page_size: u32,
    inner: Mutex<Inner>,
    view_tx: watch::Sender<FeedView>,
}

impl std::fmt::Debug for FeedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedController")
            .field("source", &self.source.name())
            .field("strategy", &self.strategy)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl FeedController {
    pub fn new(source: Arc<dyn FeedSource>, strategy: PaginationStrategy, page_size: u32) -> Self {
        ensure_metrics_described();
        let inner = Inner::new(strategy);
        let (view_tx, _) = watch::channel(inner.view());
        Self {
            source,
            strategy,
            page_size: page_size.max(1),
            inner: Mutex::new(inner),
            view_tx,
        }
    }

    pub fn from_config(source: Arc<dyn FeedSource>, cfg: &FeedConfig) -> Self {
        Self::new(source, cfg.strategy, cfg.page_size)
    }

    // --- read side ---

    pub fn strategy(&self) -> PaginationStrategy {
        self.strategy
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn view(&self) -> FeedView {
        self.lock().view()
    }

    /// Ordered, duplicate-free copy of the feed, newest first.
    pub fn snapshot(&self) -> Vec<Post> {
        self.lock().buffer.snapshot()
    }

    pub fn phase(&self) -> FeedPhase {
        self.lock().phase
    }

    pub fn fetch_status(&self) -> FetchStatus {
        self.lock().phase.fetch_status()
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    pub fn pagination(&self) -> Pagination {
        self.lock().pagination
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Receiver that sees a fresh [`FeedView`] after every transition.
    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.view_tx.subscribe()
    }

    // --- operations ---

    /// First page of a (new) feed session. Only from `Empty` or `Error`.
    pub async fn load_initial(&self, session: &Session) -> Result<LoadOutcome, FetchError> {
        let (epoch, req) = {
            let mut st = self.lock();
            match st.phase {
                FeedPhase::Empty | FeedPhase::Error => {}
                FeedPhase::Loading | FeedPhase::LoadingMore => {
                    return Ok(self.dropped("initial", DropReason::InFlight));
                }
                FeedPhase::Ready => return Ok(self.dropped("initial", DropReason::NotReady)),
            }
            st.pagination = Pagination::initial(self.strategy);
            st.has_more = false;
            st.last_error = None;
            st.phase = FeedPhase::Loading;
            self.publish(&st);
            (st.epoch, st.pagination.request())
        };

        let res = self.fetch(session, req, "initial").await;

        let mut st = self.lock();
        if st.epoch != epoch {
            return Ok(self.stale("initial"));
        }
        match res {
            Ok(batch) => {
                st.buffer.clear();
                st.pagination.advance(&batch);
                st.has_more = batch.has_more;
                let fetched = batch.items.len();
                let inserted = st.buffer.append_batch(batch.items);
                st.phase = FeedPhase::Ready;
                record_merge("initial", fetched, inserted);
                tracing::debug!(target: "feed", inserted, has_more = st.has_more, "initial load ready");
                self.publish(&st);
                Ok(LoadOutcome::Applied { inserted })
            }
            Err(e) => {
                st.buffer.clear();
                st.pagination = Pagination::initial(self.strategy);
                st.has_more = false;
                st.phase = FeedPhase::Error;
                st.last_error = Some(e.clone());
                self.publish(&st);
                Err(e)
            }
        }
    }

    /// Next older page appended at the tail. Only from `Ready` with more
    /// available; a failure leaves content, cursor and `has_more` untouched.
    pub async fn load_more(&self, session: &Session) -> Result<LoadOutcome, FetchError> {
        let (epoch, req) = {
            let mut st = self.lock();
            match st.phase {
                FeedPhase::Ready => {}
                FeedPhase::Loading | FeedPhase::LoadingMore => {
                    return Ok(self.dropped("more", DropReason::InFlight));
                }
                FeedPhase::Empty | FeedPhase::Error => {
                    return Ok(self.dropped("more", DropReason::NotReady));
                }
            }
            if !st.has_more {
                return Ok(self.dropped("more", DropReason::NoMore));
            }
            st.phase = FeedPhase::LoadingMore;
            self.publish(&st);
            (st.epoch, st.pagination.request())
        };

        let res = self.fetch(session, req, "more").await;

        let mut st = self.lock();
        if st.epoch != epoch {
            return Ok(self.stale("more"));
        }
        st.phase = FeedPhase::Ready;
        match res {
            Ok(batch) => {
                st.pagination.advance(&batch);
                st.has_more = batch.has_more;
                st.last_error = None;
                let fetched = batch.items.len();
                let inserted = st.buffer.append_batch(batch.items);
                record_merge("more", fetched, inserted);
                tracing::debug!(
                    target: "feed",
                    inserted,
                    has_more = st.has_more,
                    pagination = ?st.pagination,
                    "load more applied"
                );
                self.publish(&st);
                Ok(LoadOutcome::Applied { inserted })
            }
            Err(e) => {
                st.last_error = Some(e.clone());
                self.publish(&st);
                Err(e)
            }
        }
    }

    /// Re-fetch the newest window and merge unseen posts at the head.
    /// Leaves pagination alone and may overlap a running `load_more`.
    pub async fn refresh_merge(&self, session: &Session) -> Result<LoadOutcome, FetchError> {
        let (epoch, req) = {
            let mut st = self.lock();
            if !st.phase.has_content() {
                return Ok(self.dropped("refresh", DropReason::NotReady));
            }
            if st.refreshing {
                return Ok(self.dropped("refresh", DropReason::InFlight));
            }
            st.refreshing = true;
            self.publish(&st);
            (st.epoch, Pagination::initial(self.strategy).request())
        };

        let res = self.fetch(session, req, "refresh").await;

        let mut st = self.lock();
        if st.epoch != epoch {
            return Ok(self.stale("refresh"));
        }
        st.refreshing = false;
        match res {
            Ok(batch) => {
                let fetched = batch.items.len();
                let inserted = st.buffer.prepend_batch(batch.items);
                st.last_error = None;
                record_merge("refresh", fetched, inserted);
                if inserted > 0 {
                    tracing::debug!(target: "feed", inserted, "refresh merged new posts");
                }
                self.publish(&st);
                Ok(LoadOutcome::Applied { inserted })
            }
            Err(e) => {
                st.last_error = Some(e.clone());
                self.publish(&st);
                Err(e)
            }
        }
    }

    /// Show a freshly composed post immediately, then publish it.
    ///
    /// Optimistic and permanent: if the create call fails the error is
    /// returned, but the local entry stays. Outside `Ready`/`LoadingMore`
    /// nothing is inserted locally; a later refresh or initial load picks it up.
    /// Returns whether the post was inserted.
    pub async fn submit_new_post(&self, session: &Session, post: Post) -> Result<bool, FetchError> {
        let inserted = {
            let mut st = self.lock();
            let inserted = st.phase.has_content() && st.buffer.prepend_one(post.clone());
            if inserted {
                counter!("feed_posts_inserted_total", "op" => "compose").increment(1);
                self.publish(&st);
            }
            inserted
        };

        counter!("feed_fetch_total", "op" => "create").increment(1);
        match self.source.create_post(session, &post).await {
            Ok(created) => {
                if created.id != post.id {
                    tracing::debug!(
                        target: "feed",
                        local = %post.id,
                        remote = %created.id,
                        "server assigned a different id; local entry kept"
                    );
                }
                Ok(inserted)
            }
            Err(e) => {
                counter!("feed_fetch_errors_total", "op" => "create", "kind" => e.kind().as_str())
                    .increment(1);
                tracing::warn!(target: "feed", error = %e, id = %post.id, "create post failed; optimistic entry kept");
                Err(e)
            }
        }
    }

    /// Drop all content and pagination state and start a new epoch. Results
    /// of fetches started before this call will be ignored.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.epoch += 1;
        st.buffer.clear();
        st.pagination = Pagination::initial(self.strategy);
        st.has_more = false;
        st.refreshing = false;
        st.last_error = None;
        st.phase = FeedPhase::Empty;
        tracing::debug!(target: "feed", epoch = st.epoch, "feed reset");
        self.publish(&st);
    }

    // --- internals ---

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is only mutated in short non-panicking sections; a poisoned
        // lock still holds consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, st: &Inner) {
        gauge!("feed_size").set(st.buffer.len() as f64);
        self.view_tx.send_replace(st.view());
    }

    fn dropped(&self, op: &'static str, reason: DropReason) -> LoadOutcome {
        counter!("feed_requests_dropped_total", "op" => op, "reason" => reason.as_str())
            .increment(1);
        tracing::trace!(target: "feed", op, ?reason, "request dropped");
        LoadOutcome::Dropped { reason }
    }

    fn stale(&self, op: &'static str) -> LoadOutcome {
        counter!("feed_stale_results_total", "op" => op).increment(1);
        tracing::debug!(target: "feed", op, "discarding result from before reset");
        LoadOutcome::Stale
    }

    async fn fetch(
        &self,
        session: &Session,
        req: PageRequest,
        op: &'static str,
    ) -> Result<Batch, FetchError> {
        counter!("feed_fetch_total", "op" => op).increment(1);
        let t0 = Instant::now();
        let res = match req {
            PageRequest::Page(page) => self.source.fetch_page(session, page, self.page_size).await,
            PageRequest::After(cursor) => {
                self.source.fetch_since(session, cursor, self.page_size).await
            }
        };
        histogram!("feed_fetch_ms", "op" => op).record(t0.elapsed().as_secs_f64() * 1_000.0);
        if let Err(e) = &res {
            counter!("feed_fetch_errors_total", "op" => op, "kind" => e.kind().as_str())
                .increment(1);
            tracing::warn!(
                target: "feed",
                op,
                source = self.source.name(),
                kind = e.kind().as_str(),
                error = %e,
                "fetch failed"
            );
        }
        res
    }
}

fn record_merge(op: &'static str, fetched: usize, inserted: usize) {
    counter!("feed_posts_inserted_total", "op" => op).increment(inserted as u64);
    counter!("feed_posts_duplicate_total", "op" => op)
        .increment(fetched.saturating_sub(inserted) as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };

    #[derive(Default)]
    struct DescribedNames(Mutex<Vec<String>>);

    impl DescribedNames {
        fn push(&self, key: KeyName) {
            self.0.lock().unwrap().push(key.as_str().to_string());
        }
    }

    impl Recorder for DescribedNames {
        fn describe_counter(&self, key: KeyName, _: Option<Unit>, _: SharedString) {
            self.push(key);
        }
        fn describe_gauge(&self, key: KeyName, _: Option<Unit>, _: SharedString) {
            self.push(key);
        }
        fn describe_histogram(&self, key: KeyName, _: Option<Unit>, _: SharedString) {
            self.push(key);
        }
        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }
        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }
        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn every_emitted_series_is_described() {
        let rec = DescribedNames::default();
        metrics::with_local_recorder(&rec, describe_metrics);
        let names = rec.0.lock().unwrap().clone();
        for name in [
            "feed_fetch_total",
            "feed_fetch_errors_total",
            "feed_requests_dropped_total",
            "feed_stale_results_total",
            "feed_triggers_total",
            "feed_size",
        ] {
            assert!(names.iter().any(|n| n == name), "{name} not described");
        }
    }

    fn batch(ids: &[u64]) -> Batch {
        let items = ids
            .iter()
            .map(|&i| Post::new(i, 1, "ann", "x", Utc::now()))
            .collect();
        Batch::new(items, true)
    }

    #[test]
    fn offset_pagination_moves_one_page_per_batch() {
        let mut p = Pagination::initial(PaginationStrategy::Offset);
        assert_eq!(p.request(), PageRequest::Page(0));
        p.advance(&batch(&[10, 9]));
        p.advance(&batch(&[]));
        assert_eq!(p.request(), PageRequest::Page(2));
    }

    #[test]
    fn cursor_pagination_follows_last_item_and_ignores_empty_batches() {
        let mut p = Pagination::initial(PaginationStrategy::Cursor);
        assert_eq!(p.request(), PageRequest::After(None));
        p.advance(&batch(&[10, 9, 8]));
        assert_eq!(p.request(), PageRequest::After(Some(PostId(8))));
        p.advance(&batch(&[]));
        assert_eq!(p.request(), PageRequest::After(Some(PostId(8))));
    }

    #[test]
    fn phase_maps_to_fetch_status() {
        assert_eq!(FeedPhase::Empty.fetch_status(), FetchStatus::Idle);
        assert_eq!(FeedPhase::LoadingMore.fetch_status(), FetchStatus::InFlight);
        assert_eq!(FeedPhase::Error.fetch_status(), FetchStatus::Error);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let v = serde_json::to_value(LoadOutcome::Dropped {
            reason: DropReason::NoMore,
        })
        .unwrap();
        assert_eq!(v, serde_json::json!({"outcome": "dropped", "reason": "no_more"}));
    }
}
