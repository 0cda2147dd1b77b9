// tests/common/mod.rs
// Scripted in-memory feed source shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};

use tweet_feed::{Batch, FeedSource, FetchError, Post, PostId, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Page(u32),
    Since(Option<PostId>),
    Create(PostId),
}

/// Answers fetches from a queue in call order; an exhausted queue yields an
/// empty last page. When held, every fetch parks until `release` is called,
/// which keeps it in flight for as long as a test needs.
pub struct ScriptedSource {
    responses: Mutex<VecDeque<Result<Batch, FetchError>>>,
    create_error: Mutex<Option<FetchError>>,
    calls: Mutex<Vec<Call>>,
    held: AtomicBool,
    gate: Semaphore,
    fetched: watch::Sender<usize>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            create_error: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            fetched: watch::channel(0).0,
        })
    }

    pub fn push_ok(&self, ids: &[u64], has_more: bool) {
        self.push(Ok(batch(ids, has_more)));
    }

    pub fn push_err(&self, e: FetchError) {
        self.push(Err(e));
    }

    pub fn push(&self, r: Result<Batch, FetchError>) {
        self.responses.lock().unwrap().push_back(r);
    }

    pub fn fail_create(&self, e: FetchError) {
        *self.create_error.lock().unwrap() = Some(e);
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| !matches!(c, Call::Create(_)))
            .count()
    }

    /// Wait until `n` fetches (not creates) have reached the source.
    pub async fn wait_for_fetches(&self, n: usize) {
        let mut rx = self.fetched.subscribe();
        rx.wait_for(|c| *c >= n).await.expect("source dropped");
    }

    async fn answer(&self, call: Call) -> Result<Batch, FetchError> {
        self.calls.lock().unwrap().push(call);
        let resp = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Batch::default()));
        self.fetched.send_modify(|n| *n += 1);
        if self.held.load(Ordering::SeqCst) {
            self.gate.acquire().await.expect("gate closed").forget();
        }
        resp
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _session: &Session,
        page: u32,
        _page_size: u32,
    ) -> Result<Batch, FetchError> {
        self.answer(Call::Page(page)).await
    }

    async fn fetch_since(
        &self,
        _session: &Session,
        cursor: Option<PostId>,
        _page_size: u32,
    ) -> Result<Batch, FetchError> {
        self.answer(Call::Since(cursor)).await
    }

    async fn create_post(&self, _session: &Session, post: &Post) -> Result<Post, FetchError> {
        self.calls.lock().unwrap().push(Call::Create(post.id));
        match self.create_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(post.clone()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn post(id: u64) -> Post {
    let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(id as i64);
    Post::new(id, id % 3, format!("user{}", id % 3), format!("tweet {id}"), ts)
}

pub fn batch(ids: &[u64], has_more: bool) -> Batch {
    Batch::new(ids.iter().map(|&i| post(i)).collect(), has_more)
}

pub fn ids(posts: &[Post]) -> Vec<u64> {
    posts.iter().map(|p| p.id.0).collect()
}

pub fn session() -> Session {
    Session::new("test-token")
}
