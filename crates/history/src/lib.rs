//! Adaptive history discovery and cache coordination.
//!
//! This crate composes the upstream batch client and the metadata store
//! into the single facade external collaborators consume:
//! - `fetcher`: segment-subdivision discovery of dense timelines at
//!   minimal upstream probe cost
//! - `lock`: cross-process repository refresh lock with heartbeat
//! - `singleflight`: in-process request coalescing
//! - `service`: the `HistoryService` facade tying it all together

pub mod error;
pub mod fetcher;
pub mod lock;
pub mod service;
pub mod singleflight;

pub use error::{HistoryError, HistoryResult};
pub use fetcher::discover_range;
pub use lock::{LockGuard, LockService};
pub use service::HistoryService;
pub use singleflight::{Flight, FlightLeader, SingleFlight};
