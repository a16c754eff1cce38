//! Snapshot repository trait.

use crate::error::MetadataResult;
use crate::models::SnapshotRow;
use async_trait::async_trait;
use time::Date;
use uuid::Uuid;

/// Repository for per-day count snapshots.
#[async_trait]
pub trait SnapshotRepo: Send + Sync {
    /// Persist a batch of snapshots in one transaction.
    ///
    /// Colliding `(repository_id, snapshot_date)` rows are repaired in
    /// place (the incoming counts win); rows are never deleted. Readers see
    /// either none or all of the batch.
    async fn upsert_snapshots(&self, snapshots: &[SnapshotRow]) -> MetadataResult<()>;

    /// All snapshots for a repository, ascending by date.
    async fn list_snapshots(&self, repository_id: Uuid) -> MetadataResult<Vec<SnapshotRow>>;

    /// The most recent snapshot date, if any.
    async fn latest_snapshot_date(&self, repository_id: Uuid) -> MetadataResult<Option<Date>>;
}
