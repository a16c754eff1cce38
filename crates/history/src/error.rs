//! History service error types.

use gitpulse_github::GithubError;
use gitpulse_metadata::MetadataError;
use std::sync::Arc;
use thiserror::Error;

/// History service operation errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Upstream(#[from] GithubError),

    #[error(transparent)]
    Storage(#[from] MetadataError),

    #[error(transparent)]
    Repo(#[from] gitpulse_core::Error),

    #[error("a refresh for {owner}/{name} is already in progress; try again shortly")]
    Busy { owner: String, name: String },

    /// Failure of a coalesced refresh, delivered to every caller that
    /// awaited the same in-flight fetch. The originating error sits inside.
    #[error("{0}")]
    Shared(Arc<HistoryError>),
}

/// Result type for history operations.
pub type HistoryResult<T> = std::result::Result<T, HistoryError>;
