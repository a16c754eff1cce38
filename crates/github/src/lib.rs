//! Batched GitHub GraphQL client.
//!
//! Translates lists of probe dates into single aliased GraphQL documents,
//! decodes the per-date count tuples out of the reply, and classifies
//! upstream failures into a typed error. Retry policy belongs to callers;
//! this crate never retries internally.

pub mod client;
pub mod error;
mod query;
mod response;

pub use client::{GithubClient, RateLimitInfo, RepositoryInfo, UpstreamClient};
pub use error::{GithubError, GithubResult};
