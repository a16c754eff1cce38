//! Upstream client error types.

use thiserror::Error;
use time::OffsetDateTime;

/// Upstream client operation errors.
#[derive(Debug, Error)]
pub enum GithubError {
    #[error("repository not found: {owner}/{name}")]
    NotFound { owner: String, name: String },

    #[error("upstream rate limit exhausted")]
    RateLimited { reset_at: Option<OffsetDateTime> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed upstream reply: {0}")]
    Protocol(String),

    #[error("probe batch of {requested} dates exceeds the maximum of {max}")]
    BatchTooLarge { requested: usize, max: usize },
}

impl From<reqwest::Error> for GithubError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Result type for upstream client operations.
pub type GithubResult<T> = std::result::Result<T, GithubError>;
