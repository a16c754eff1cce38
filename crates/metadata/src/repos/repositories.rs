//! Tracked-repository repository trait.

use crate::error::MetadataResult;
use crate::models::RepositoryRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for tracked-repository records.
///
/// `owner`/`name` arguments are the canonical lowercase forms.
#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    /// Insert a repository record; a concurrent insert of the same
    /// `(owner, name)` pair is tolerated and leaves the existing row.
    async fn create_repository(&self, repository: &RepositoryRow) -> MetadataResult<()>;

    /// Get a repository by its canonical owner and name.
    async fn get_repository(&self, owner: &str, name: &str)
    -> MetadataResult<Option<RepositoryRow>>;

    /// Record that a refresh persisted data for this repository.
    async fn touch_last_synced(
        &self,
        repository_id: Uuid,
        synced_at: OffsetDateTime,
    ) -> MetadataResult<()>;
}
