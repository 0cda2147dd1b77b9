// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod collection;
pub mod config;
pub mod controller;
pub mod error;
pub mod post;
pub mod source;
pub mod telemetry;
pub mod triggers;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::collection::FeedBuffer;
pub use crate::config::FeedConfig;
pub use crate::controller::{
    DropReason, FeedController, FeedPhase, FeedView, FetchStatus, LoadOutcome, Pagination,
};
pub use crate::error::{FetchError, FetchErrorKind};
pub use crate::post::{Post, PostId, Session};
pub use crate::source::{Batch, FeedSource, PaginationStrategy};
pub use crate::triggers::{FeedTriggers, Trigger, TriggerOutcome};
