//! Core domain types and shared logic for gitpulse.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Repository references and their case-insensitive cache keys
//! - Per-day activity count tuples and timeline points
//! - Day-precision UTC date arithmetic
//! - Configuration types and environment loading

pub mod config;
pub mod counts;
pub mod dates;
pub mod error;
pub mod repo;

pub use config::{
    AppConfig, HistoryConfig, LockConfig, MetadataConfig, ResolutionConfig, UpstreamConfig,
};
pub use counts::{ActivityCounts, TimelinePoint};
pub use dates::{day_span, midpoint, today_utc};
pub use error::{Error, Result};
pub use repo::RepoRef;
