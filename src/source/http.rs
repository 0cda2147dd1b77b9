// src/source/http.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::post::{Post, PostId, Session};
use crate::source::{Batch, FeedSource};

// --- tolerant wire shapes of the feed API ---

#[derive(Debug, Deserialize)]
struct WireUser {
    id: u64,
    username: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Text(String),
    Millis(i64),
}

#[derive(Debug, Deserialize)]
struct WirePost {
    id: u64,
    content: String,
    #[serde(alias = "createdAt", alias = "created_at")]
    timestamp: WireTimestamp,
    user: WireUser,
}

/// `/feed` may return bare posts or feed rows wrapping a post.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireEntry {
    Post(WirePost),
    Row { tweet: WirePost },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePage {
    Plain {
        items: Vec<WireEntry>,
        #[serde(rename = "hasMore", alias = "has_more")]
        has_more: bool,
    },
    Spring {
        content: Vec<WireEntry>,
        #[serde(default)]
        last: Option<bool>,
        #[serde(rename = "totalPages", default)]
        total_pages: Option<u32>,
        #[serde(default)]
        number: Option<u32>,
    },
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
}

#[derive(Serialize)]
struct CreateReq<'a> {
    content: &'a str,
}

fn parse_timestamp(ts: WireTimestamp) -> Result<DateTime<Utc>, FetchError> {
    match ts {
        WireTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| FetchError::MalformedResponse(format!("timestamp out of range: {ms}"))),
        WireTimestamp::Text(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
                return Ok(dt.with_timezone(&Utc));
            }
            // server-local date-times come without an offset; read them as UTC
            NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|n| n.and_utc())
                .map_err(|e| FetchError::MalformedResponse(format!("bad timestamp {s:?}: {e}")))
        }
    }
}

impl TryFrom<WirePost> for Post {
    type Error = FetchError;

    fn try_from(w: WirePost) -> Result<Self, Self::Error> {
        Ok(Post {
            id: PostId(w.id),
            author_id: w.user.id,
            author_username: w.user.username,
            content: w.content,
            created_at: parse_timestamp(w.timestamp)?,
        })
    }
}

fn into_posts(entries: Vec<WireEntry>) -> Result<Vec<Post>, FetchError> {
    entries
        .into_iter()
        .map(|e| match e {
            WireEntry::Post(p) | WireEntry::Row { tweet: p } => Post::try_from(p),
        })
        .collect()
}

/// Convert a response body into a batch. Either the whole body converts or
/// the call fails; a half-parsed page is never returned.
fn parse_page(body: &str, page_size: u32) -> Result<Batch, FetchError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(FetchError::MalformedResponse("empty feed body".into()));
    }
    let page: WirePage = serde_json::from_str(trimmed)
        .map_err(|e| FetchError::MalformedResponse(format!("feed page: {e}")))?;
    match page {
        WirePage::Plain { items, has_more } => Ok(Batch::new(into_posts(items)?, has_more)),
        WirePage::Spring {
            content,
            last,
            total_pages,
            number,
        } => {
            let full_page = content.len() as u32 >= page_size;
            let has_more = match (last, total_pages, number) {
                (Some(last), _, _) => !last,
                (None, Some(total), Some(n)) => n.saturating_add(1) < total,
                _ => full_page,
            };
            Ok(Batch::new(into_posts(content)?, has_more))
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

async fn error_message(rsp: Response) -> String {
    let status = rsp.status();
    let text = rsp.text().await.unwrap_or_default();
    if let Ok(w) = serde_json::from_str::<WireError>(&text) {
        return w.error;
    }
    let t = text.trim();
    if t.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {t}")
    }
}

/// REST client for the feed API. Stateless apart from the connection pool.
#[derive(Clone)]
pub struct HttpFeedSource {
    client: Client,
    feed_url: String,
    cursor_url: String,
    create_url: String,
    max_retries: u8,
    backoff_base: Duration,
}

impl HttpFeedSource {
    pub fn from_config(cfg: &FeedConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tweet-feed/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            feed_url: cfg.endpoint(&cfg.feed_path),
            cursor_url: cfg.endpoint(&cfg.cursor_path),
            create_url: cfg.endpoint(&cfg.create_path),
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_millis(500),
        })
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    async fn backoff(&self, attempt: u32) {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        tokio::time::sleep(self.backoff_base * factor).await;
    }

    /// Send with bearer auth. With `retry`, network-class failures are retried;
    /// auth and other client errors always return immediately.
    async fn send<F>(
        &self,
        session: &Session,
        retry: bool,
        build: F,
    ) -> Result<Response, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        if session.is_empty() {
            return Err(FetchError::AuthRequired("no session token".into()));
        }

        let max_retries = if retry { u32::from(self.max_retries) } else { 0 };
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let can_retry = attempt <= max_retries;
            match build().bearer_auth(session.bearer()).send().await {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        return Ok(rsp);
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        return Err(FetchError::AuthRequired(error_message(rsp).await));
                    }
                    if is_retryable_status(status) && can_retry {
                        tracing::debug!(target: "feed::http", %status, attempt, "retrying");
                        self.backoff(attempt).await;
                        continue;
                    }
                    return Err(FetchError::NetworkFailure(error_message(rsp).await));
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect() || e.is_request()) && can_retry {
                        tracing::debug!(target: "feed::http", error = %e, attempt, "retrying");
                        self.backoff(attempt).await;
                        continue;
                    }
                    return Err(FetchError::from(e));
                }
            }
        }
    }

    async fn get_batch(
        &self,
        session: &Session,
        url: &str,
        query: &[(&str, String)],
        page_size: u32,
    ) -> Result<Batch, FetchError> {
        let rsp = self
            .send(session, true, || self.client.get(url).query(query))
            .await?;
        let body = rsp.text().await?;
        let batch = parse_page(&body, page_size)?;
        tracing::debug!(
            target: "feed::http",
            url,
            items = batch.items.len(),
            has_more = batch.has_more,
            "batch received"
        );
        Ok(batch)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_page(
        &self,
        session: &Session,
        page: u32,
        page_size: u32,
    ) -> Result<Batch, FetchError> {
        let query = [("page", page.to_string()), ("size", page_size.to_string())];
        self.get_batch(session, &self.feed_url, &query, page_size)
            .await
    }

    async fn fetch_since(
        &self,
        session: &Session,
        cursor: Option<PostId>,
        page_size: u32,
    ) -> Result<Batch, FetchError> {
        let mut query = vec![("size", page_size.to_string())];
        if let Some(id) = cursor {
            query.push(("after", id.to_string()));
        }
        self.get_batch(session, &self.cursor_url, &query, page_size)
            .await
    }

    async fn create_post(&self, session: &Session, post: &Post) -> Result<Post, FetchError> {
        let req = CreateReq {
            content: &post.content,
        };
        // Creating is not idempotent: a lost response may still have committed.
        let rsp = self
            .send(session, false, || self.client.post(&self.create_url).json(&req))
            .await?;
        let body = rsp.text().await?;
        let wire: WirePost = serde_json::from_str(body.trim())
            .map_err(|e| FetchError::MalformedResponse(format!("created post: {e}")))?;
        Post::try_from(wire)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
