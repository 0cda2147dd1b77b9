// src/post.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable post identifier; the dedup key of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PostId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// One immutable post as delivered by the feed source.
///
/// `content` is carried as-is: length limits are enforced by the compose
/// side, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: u64,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn new(
        id: impl Into<PostId>,
        author_id: u64,
        author_username: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            author_id,
            author_username: author_username.into(),
            content: content.into(),
            created_at,
        }
    }
}

/// Opaque session token forwarded to the feed source on every call.
///
/// The engine never reads it; `Debug` is redacted so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Session(String);

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw bearer token, for fetch-client implementations only.
    pub fn bearer(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Session(<redacted>)")
    }
}
