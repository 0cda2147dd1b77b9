// src/error.rs
use serde::Serialize;
use thiserror::Error;

/// Failure of a feed-source call. The controller treats every variant the
/// same way for state purposes; the variant only tells the UI what to offer
/// (re-login vs. retry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("authentication required: {0}")]
    AuthRequired(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    AuthRequired,
    NetworkFailure,
    MalformedResponse,
}

impl FetchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::NetworkFailure => "network_failure",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::AuthRequired(_) => FetchErrorKind::AuthRequired,
            Self::NetworkFailure(_) => FetchErrorKind::NetworkFailure,
            Self::MalformedResponse(_) => FetchErrorKind::MalformedResponse,
        }
    }

    /// Human-readable cause without the kind prefix.
    pub fn cause(&self) -> &str {
        match self {
            Self::AuthRequired(m) | Self::NetworkFailure(m) | Self::MalformedResponse(m) => m,
        }
    }

    /// Whether re-issuing the same trigger may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthRequired(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            // connect, timeout, body read, redirect loops
            Self::NetworkFailure(e.to_string())
        }
    }
}
