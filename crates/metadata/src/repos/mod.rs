//! Repository traits for metadata operations.

pub mod locks;
pub mod repositories;
pub mod snapshots;

pub use locks::LockRepo;
pub use repositories::RepositoryRepo;
pub use snapshots::SnapshotRepo;
