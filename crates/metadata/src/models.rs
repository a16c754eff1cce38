//! Database models mapping to the metadata schema.

use gitpulse_core::ActivityCounts;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Tracked repository record.
///
/// `owner` and `name` are stored lowercase; repository identity is
/// case-insensitive.
#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRow {
    pub repository_id: Uuid,
    pub owner: String,
    pub name: String,
    /// Repository creation day (UTC), the left edge of its timeline.
    pub created_at: Date,
    /// When a refresh last persisted data for this repository.
    pub last_synced_at: Option<OffsetDateTime>,
}

/// Persisted per-day count tuple.
///
/// Rows are never deleted; an upsert on the same `(repository_id,
/// snapshot_date)` only repairs the count columns.
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub repository_id: Uuid,
    pub snapshot_date: Date,
    pub issues_created: i64,
    pub issues_closed: i64,
    pub prs_created: i64,
    pub prs_closed: i64,
    pub prs_merged: i64,
}

impl SnapshotRow {
    pub fn from_counts(repository_id: Uuid, snapshot_date: Date, counts: &ActivityCounts) -> Self {
        Self {
            repository_id,
            snapshot_date,
            issues_created: counts.issues_created as i64,
            issues_closed: counts.issues_closed as i64,
            prs_created: counts.prs_created as i64,
            prs_closed: counts.prs_closed as i64,
            prs_merged: counts.prs_merged as i64,
        }
    }

    pub fn counts(&self) -> ActivityCounts {
        ActivityCounts {
            issues_created: self.issues_created.max(0) as u64,
            issues_closed: self.issues_closed.max(0) as u64,
            prs_created: self.prs_created.max(0) as u64,
            prs_closed: self.prs_closed.max(0) as u64,
            prs_merged: self.prs_merged.max(0) as u64,
        }
    }
}

/// Cross-process refresh lock record.
///
/// A row is valid while `expires_at` lies in the future; any actor may
/// remove an expired row.
#[derive(Debug, Clone, FromRow)]
pub struct LockRow {
    pub lock_id: Uuid,
    pub owner: String,
    pub name: String,
    pub locked_at: OffsetDateTime,
    pub last_heartbeat_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub lock_holder_id: Uuid,
}
