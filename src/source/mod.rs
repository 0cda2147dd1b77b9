// src/source/mod.rs
pub mod http;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::post::{Post, PostId, Session};

/// One page of posts plus the source's "more available" flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Newest first, as the source returns them.
    pub items: Vec<Post>,
    pub has_more: bool,
}

impl Batch {
    pub fn new(items: Vec<Post>, has_more: bool) -> Self {
        Self { items, has_more }
    }
}

/// How a controller walks backwards through the feed. Fixed per instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationStrategy {
    /// Numbered pages: `page`, `size`.
    #[default]
    Offset,
    /// "Everything older than this id".
    Cursor,
}

impl std::str::FromStr for PaginationStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offset" | "page" => Ok(Self::Offset),
            "cursor" | "since" => Ok(Self::Cursor),
            other => anyhow::bail!("unknown pagination strategy: {other}"),
        }
    }
}

/// Contract the controller needs from whatever serves the feed.
///
/// Implementations own transport concerns (timeouts, retries, auth headers);
/// the session is only borrowed for the duration of a call.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_page(
        &self,
        session: &Session,
        page: u32,
        page_size: u32,
    ) -> Result<Batch, FetchError>;

    /// Posts older than `cursor`; `None` means "from the top".
    async fn fetch_since(
        &self,
        session: &Session,
        cursor: Option<PostId>,
        page_size: u32,
    ) -> Result<Batch, FetchError>;

    /// Publish a post that is already shown locally.
    async fn create_post(&self, session: &Session, post: &Post) -> Result<Post, FetchError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("Offset".parse::<PaginationStrategy>().unwrap(), PaginationStrategy::Offset);
        assert_eq!(" since ".parse::<PaginationStrategy>().unwrap(), PaginationStrategy::Cursor);
        assert!("random".parse::<PaginationStrategy>().is_err());
    }
}
