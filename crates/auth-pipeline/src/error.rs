//! Error types for pipeline operations
//!
//! Every error is scoped to one call. Responses are boxed so the `Result`
//! stays small on the happy path.

use std::time::Duration;

use transport::ApiResponse;

/// Why a renewal did not produce a credential.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenewalError {
    /// A renewal started less than `COOLDOWN_WINDOW` ago. `renewed` tells
    /// whether that attempt succeeded.
    #[error("renewal cooling down for another {}ms", remaining.as_millis())]
    CoolingDown { remaining: Duration, renewed: bool },

    #[error("renewal failed: {0}")]
    Failed(String),

    /// The session was signed out or replaced while the renewal was in
    /// flight; its result was discarded.
    #[error("renewal superseded by a session change")]
    Superseded,
}

/// Errors surfaced to callers of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unauthorized ({})", .0.status)]
    Unauthorized(Box<ApiResponse>),

    #[error("forbidden ({})", .0.status)]
    Forbidden(Box<ApiResponse>),

    /// Any other non-success status, passed through unchanged.
    #[error("request failed with status {}", .0.status)]
    Status(Box<ApiResponse>),

    #[error(transparent)]
    RenewalFailed(#[from] RenewalError),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// The upstream response behind an HTTP-status error.
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Error::Unauthorized(r) | Error::Forbidden(r) | Error::Status(r) => Some(r),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        match e {
            transport::Error::InvalidRequest(msg) => Error::InvalidRequest(msg),
            transport::Error::Timeout(msg) => Error::Timeout(msg),
            other => Error::Network(other.to_string()),
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
