//!
//! src/errors.rs
//!
//! Defines the error enum shared by every stage of a resolution and the
//! conversions from the http, json and sqlite layers into it.
//!
//!

use reqwest::StatusCode;
use thiserror::Error;

/// Every failure a resolution (or its persistence) can end in.
///
/// Cloneable so that one failed token exchange can be handed to every
/// caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream auth failure: {0}")]
    UpstreamAuth(String),
    #[error("upstream fetch failure: {0}")]
    UpstreamFetch(String),
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),
    #[error("slug already taken: {0}")]
    SlugTaken(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("resolution cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String)
}

impl ResolveError {
    /// Short machine readable code handed back to callers. Never carries
    /// upstream bodies or credentials.
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::InvalidInput(_)    => "invalid-input",
            ResolveError::NotFound(_)        => "not-found-by-upc",
            ResolveError::UpstreamAuth(_)    => "upstream-auth-failure",
            ResolveError::UpstreamFetch(_)   => "metadata-fetch-failed",
            ResolveError::UpstreamTimeout(_) => "upstream-timeout",
            ResolveError::SlugTaken(_)       => "slug-taken",
            ResolveError::Storage(_)         => "storage-failure",
            ResolveError::Cancelled          => "cancelled",
            ResolveError::Config(_) | ResolveError::Internal(_) => "internal-error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ResolveError::InvalidInput(_)    => StatusCode::BAD_REQUEST,
            ResolveError::NotFound(_)        => StatusCode::NOT_FOUND,
            ResolveError::UpstreamAuth(_)    => StatusCode::BAD_GATEWAY,
            ResolveError::UpstreamFetch(_)   => StatusCode::BAD_GATEWAY,
            ResolveError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ResolveError::SlugTaken(_)       => StatusCode::CONFLICT,
            ResolveError::Cancelled          => StatusCode::REQUEST_TIMEOUT,
            ResolveError::Storage(_)
            | ResolveError::Config(_)
            | ResolveError::Internal(_)      => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ResolveError::UpstreamTimeout(e.to_string())
        } else {
            ResolveError::UpstreamFetch(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(e: serde_json::Error) -> Self {
        ResolveError::UpstreamFetch(format!("malformed body: {e}"))
    }
}

impl From<sqlx::Error> for ResolveError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() =>
                ResolveError::SlugTaken(db.message().to_string()),
            _ => ResolveError::Storage(e.to_string())
        }
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(e: std::io::Error) -> Self { ResolveError::Internal(e.to_string()) }
}
