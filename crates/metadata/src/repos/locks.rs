//! Repository-lock repository trait.

use crate::error::MetadataResult;
use crate::models::LockRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for cross-process refresh lock rows.
///
/// The unique `(owner, name)` index makes the insert the acquisition
/// primitive; every destructive operation re-checks its precondition inside
/// the statement so two workers can never both believe they hold the lock.
#[async_trait]
pub trait LockRepo: Send + Sync {
    /// Attempt to insert a lock row. Returns false when a row for the same
    /// repository already exists (valid or not).
    async fn try_insert_lock(&self, lock: &LockRow) -> MetadataResult<bool>;

    /// Read the current lock row for a repository.
    async fn get_lock(&self, owner: &str, name: &str) -> MetadataResult<Option<LockRow>>;

    /// Delete the lock row only if it is expired at `now`. The expiry is
    /// re-checked inside the DELETE so a concurrent heartbeat cannot lose a
    /// freshly extended lock.
    async fn delete_expired_lock(
        &self,
        owner: &str,
        name: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Delete the lock row only if `holder_id` still owns it.
    async fn release_lock(
        &self,
        owner: &str,
        name: &str,
        holder_id: Uuid,
    ) -> MetadataResult<bool>;

    /// Extend the lock only if `holder_id` still owns it. Returns false
    /// when another holder has taken over.
    async fn refresh_lock(
        &self,
        owner: &str,
        name: &str,
        holder_id: Uuid,
        heartbeat_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Delete every lock row expired at `now`; returns how many were swept.
    async fn sweep_expired_locks(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}
