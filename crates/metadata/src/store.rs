//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::{LockRepo, RepositoryRepo, SnapshotRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: RepositoryRepo + SnapshotRepo + LockRepo + Send + Sync {
    /// Apply the database schema.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store. `:memory:` opens an in-memory database
    /// (useful for testing).
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        let url = if path == Path::new(":memory:") {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            format!("sqlite:{}?mode=rwc", path.display())
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under service concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::{LockRow, RepositoryRow, SnapshotRow};
    use time::{Date, OffsetDateTime};
    use uuid::Uuid;

    #[async_trait]
    impl RepositoryRepo for SqliteStore {
        async fn create_repository(&self, repository: &RepositoryRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO repositories (repository_id, owner, name, created_at, last_synced_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (owner, name) DO NOTHING
                "#,
            )
            .bind(repository.repository_id)
            .bind(&repository.owner)
            .bind(&repository.name)
            .bind(repository.created_at)
            .bind(repository.last_synced_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_repository(
            &self,
            owner: &str,
            name: &str,
        ) -> MetadataResult<Option<RepositoryRow>> {
            let row = sqlx::query_as::<_, RepositoryRow>(
                "SELECT * FROM repositories WHERE owner = ? AND name = ?",
            )
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn touch_last_synced(
            &self,
            repository_id: Uuid,
            synced_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE repositories SET last_synced_at = ? WHERE repository_id = ?")
                .bind(synced_at)
                .bind(repository_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl SnapshotRepo for SqliteStore {
        async fn upsert_snapshots(&self, snapshots: &[SnapshotRow]) -> MetadataResult<()> {
            if snapshots.is_empty() {
                return Ok(());
            }

            // One transaction for the batch: readers see none or all of it.
            let mut tx = self.pool.begin().await?;

            for snapshot in snapshots {
                sqlx::query(
                    r#"
                    INSERT INTO snapshots (
                        repository_id, snapshot_date,
                        issues_created, issues_closed,
                        prs_created, prs_closed, prs_merged
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (repository_id, snapshot_date) DO UPDATE SET
                        issues_created = excluded.issues_created,
                        issues_closed = excluded.issues_closed,
                        prs_created = excluded.prs_created,
                        prs_closed = excluded.prs_closed,
                        prs_merged = excluded.prs_merged
                    "#,
                )
                .bind(snapshot.repository_id)
                .bind(snapshot.snapshot_date)
                .bind(snapshot.issues_created)
                .bind(snapshot.issues_closed)
                .bind(snapshot.prs_created)
                .bind(snapshot.prs_closed)
                .bind(snapshot.prs_merged)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn list_snapshots(&self, repository_id: Uuid) -> MetadataResult<Vec<SnapshotRow>> {
            let rows = sqlx::query_as::<_, SnapshotRow>(
                "SELECT * FROM snapshots WHERE repository_id = ? ORDER BY snapshot_date",
            )
            .bind(repository_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn latest_snapshot_date(&self, repository_id: Uuid) -> MetadataResult<Option<Date>> {
            let date = sqlx::query_scalar::<_, Date>(
                "SELECT snapshot_date FROM snapshots WHERE repository_id = ? \
                 ORDER BY snapshot_date DESC LIMIT 1",
            )
            .bind(repository_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(date)
        }
    }

    #[async_trait]
    impl LockRepo for SqliteStore {
        async fn try_insert_lock(&self, lock: &LockRow) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO repository_locks (
                    lock_id, owner, name,
                    locked_at, last_heartbeat_at, expires_at, lock_holder_id
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (owner, name) DO NOTHING
                "#,
            )
            .bind(lock.lock_id)
            .bind(&lock.owner)
            .bind(&lock.name)
            .bind(lock.locked_at)
            .bind(lock.last_heartbeat_at)
            .bind(lock.expires_at)
            .bind(lock.lock_holder_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn get_lock(&self, owner: &str, name: &str) -> MetadataResult<Option<LockRow>> {
            let row = sqlx::query_as::<_, LockRow>(
                "SELECT * FROM repository_locks WHERE owner = ? AND name = ?",
            )
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_expired_lock(
            &self,
            owner: &str,
            name: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "DELETE FROM repository_locks WHERE owner = ? AND name = ? AND expires_at <= ?",
            )
            .bind(owner)
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn release_lock(
            &self,
            owner: &str,
            name: &str,
            holder_id: Uuid,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "DELETE FROM repository_locks WHERE owner = ? AND name = ? AND lock_holder_id = ?",
            )
            .bind(owner)
            .bind(name)
            .bind(holder_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn refresh_lock(
            &self,
            owner: &str,
            name: &str,
            holder_id: Uuid,
            heartbeat_at: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE repository_locks SET last_heartbeat_at = ?, expires_at = ? \
                 WHERE owner = ? AND name = ? AND lock_holder_id = ?",
            )
            .bind(heartbeat_at)
            .bind(expires_at)
            .bind(owner)
            .bind(name)
            .bind(holder_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn sweep_expired_locks(&self, now: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM repository_locks WHERE expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Tracked repositories
CREATE TABLE IF NOT EXISTS repositories (
    repository_id BLOB PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_synced_at TEXT,
    UNIQUE (owner, name)
);

-- Per-day count snapshots. Rows are never deleted; upserts only repair
-- the count columns of an existing date.
CREATE TABLE IF NOT EXISTS snapshots (
    repository_id BLOB NOT NULL,
    snapshot_date TEXT NOT NULL,
    issues_created INTEGER NOT NULL,
    issues_closed INTEGER NOT NULL,
    prs_created INTEGER NOT NULL,
    prs_closed INTEGER NOT NULL,
    prs_merged INTEGER NOT NULL,
    PRIMARY KEY (repository_id, snapshot_date),
    FOREIGN KEY (repository_id) REFERENCES repositories(repository_id) ON DELETE CASCADE
);

-- Cross-process refresh locks
CREATE TABLE IF NOT EXISTS repository_locks (
    lock_id BLOB PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    locked_at TEXT NOT NULL,
    last_heartbeat_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    lock_holder_id BLOB NOT NULL,
    UNIQUE (owner, name)
);
CREATE INDEX IF NOT EXISTS idx_repository_locks_expiry ON repository_locks(expires_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LockRow, RepositoryRow, SnapshotRow};
    use gitpulse_core::ActivityCounts;
    use time::macros::date;
    use time::{Duration as TimeDuration, OffsetDateTime};
    use uuid::Uuid;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(temp.path().join("test.db"))
            .await
            .expect("store should open");
        (temp, store)
    }

    fn repo_row() -> RepositoryRow {
        RepositoryRow {
            repository_id: Uuid::new_v4(),
            owner: "octo".to_string(),
            name: "spoon".to_string(),
            created_at: date!(2020 - 06 - 01),
            last_synced_at: None,
        }
    }

    fn snapshot(repository_id: Uuid, day: time::Date, base: u64) -> SnapshotRow {
        SnapshotRow::from_counts(
            repository_id,
            day,
            &ActivityCounts {
                issues_created: base,
                issues_closed: base / 2,
                prs_created: base / 3,
                prs_closed: base / 4,
                prs_merged: base / 5,
            },
        )
    }

    fn lock_row(owner: &str, name: &str, expires_in_secs: i64) -> LockRow {
        let now = OffsetDateTime::now_utc();
        LockRow {
            lock_id: Uuid::new_v4(),
            owner: owner.to_string(),
            name: name.to_string(),
            locked_at: now,
            last_heartbeat_at: now,
            expires_at: now + TimeDuration::seconds(expires_in_secs),
            lock_holder_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("reopen.db");
        {
            let _store = SqliteStore::new(&path).await.expect("first open");
        }
        {
            let store = SqliteStore::new(&path).await.expect("second open");
            store.health_check().await.unwrap();
        }
    }

    #[tokio::test]
    async fn repository_create_and_get() {
        let (_temp, store) = test_store().await;
        let repo = repo_row();

        store.create_repository(&repo).await.unwrap();
        let loaded = store
            .get_repository("octo", "spoon")
            .await
            .unwrap()
            .expect("repository should exist");
        assert_eq!(loaded.repository_id, repo.repository_id);
        assert_eq!(loaded.created_at, repo.created_at);
        assert!(loaded.last_synced_at.is_none());

        assert!(store.get_repository("octo", "fork").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repository_create_tolerates_concurrent_duplicate() {
        let (_temp, store) = test_store().await;
        let first = repo_row();
        let mut second = repo_row();
        second.repository_id = Uuid::new_v4();

        store.create_repository(&first).await.unwrap();
        store.create_repository(&second).await.unwrap();

        let loaded = store.get_repository("octo", "spoon").await.unwrap().unwrap();
        assert_eq!(loaded.repository_id, first.repository_id, "first insert wins");
    }

    #[tokio::test]
    async fn touch_last_synced_updates_timestamp() {
        let (_temp, store) = test_store().await;
        let repo = repo_row();
        store.create_repository(&repo).await.unwrap();

        let at = OffsetDateTime::now_utc();
        store.touch_last_synced(repo.repository_id, at).await.unwrap();

        let loaded = store.get_repository("octo", "spoon").await.unwrap().unwrap();
        assert!(loaded.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn snapshots_roundtrip_sorted_and_unique() {
        let (_temp, store) = test_store().await;
        let repo = repo_row();
        store.create_repository(&repo).await.unwrap();

        // Insert out of order; listing must come back ascending.
        let rows = vec![
            snapshot(repo.repository_id, date!(2024 - 02 - 01), 40),
            snapshot(repo.repository_id, date!(2024 - 01 - 01), 20),
            snapshot(repo.repository_id, date!(2024 - 03 - 01), 60),
        ];
        store.upsert_snapshots(&rows).await.unwrap();

        let listed = store.list_snapshots(repo.repository_id).await.unwrap();
        assert_eq!(listed.len(), 3);
        let dates: Vec<_> = listed.iter().map(|s| s.snapshot_date).collect();
        assert_eq!(
            dates,
            vec![
                date!(2024 - 01 - 01),
                date!(2024 - 02 - 01),
                date!(2024 - 03 - 01)
            ]
        );
        for window in listed.windows(2) {
            assert!(window[1].counts().is_monotone_from(&window[0].counts()));
        }

        assert_eq!(
            store.latest_snapshot_date(repo.repository_id).await.unwrap(),
            Some(date!(2024 - 03 - 01))
        );
    }

    #[tokio::test]
    async fn snapshot_upsert_repairs_same_date() {
        let (_temp, store) = test_store().await;
        let repo = repo_row();
        store.create_repository(&repo).await.unwrap();

        let day = date!(2024 - 01 - 15);
        store
            .upsert_snapshots(&[snapshot(repo.repository_id, day, 10)])
            .await
            .unwrap();
        store
            .upsert_snapshots(&[snapshot(repo.repository_id, day, 99)])
            .await
            .unwrap();

        let listed = store.list_snapshots(repo.repository_id).await.unwrap();
        assert_eq!(listed.len(), 1, "same date must not duplicate");
        assert_eq!(listed[0].issues_created, 99, "fresher write wins");
    }

    #[tokio::test]
    async fn empty_snapshot_batch_is_a_noop() {
        let (_temp, store) = test_store().await;
        store.upsert_snapshots(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn lock_insert_conflicts_on_same_repository() {
        let (_temp, store) = test_store().await;

        let first = lock_row("octo", "spoon", 120);
        assert!(store.try_insert_lock(&first).await.unwrap());

        let second = lock_row("octo", "spoon", 120);
        assert!(!store.try_insert_lock(&second).await.unwrap());

        // A different repository is unaffected.
        let other = lock_row("octo", "fork", 120);
        assert!(store.try_insert_lock(&other).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_holder() {
        let (_temp, store) = test_store().await;
        let lock = lock_row("octo", "spoon", 120);
        store.try_insert_lock(&lock).await.unwrap();

        assert!(
            !store
                .release_lock("octo", "spoon", Uuid::new_v4())
                .await
                .unwrap(),
            "foreign holder must not release"
        );
        assert!(
            store
                .release_lock("octo", "spoon", lock.lock_holder_id)
                .await
                .unwrap()
        );
        assert!(store.get_lock("octo", "spoon").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_extends_only_for_current_holder() {
        let (_temp, store) = test_store().await;
        let lock = lock_row("octo", "spoon", 120);
        store.try_insert_lock(&lock).await.unwrap();

        let later = OffsetDateTime::now_utc() + TimeDuration::seconds(300);
        assert!(
            store
                .refresh_lock("octo", "spoon", lock.lock_holder_id, later, later)
                .await
                .unwrap()
        );
        assert!(
            !store
                .refresh_lock("octo", "spoon", Uuid::new_v4(), later, later)
                .await
                .unwrap(),
            "refresh by a foreign holder must report loss of the lock"
        );

        let current = store.get_lock("octo", "spoon").await.unwrap().unwrap();
        assert_eq!(current.lock_holder_id, lock.lock_holder_id);
    }

    #[tokio::test]
    async fn expired_lock_is_deleted_only_when_expired() {
        let (_temp, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        let live = lock_row("octo", "spoon", 120);
        store.try_insert_lock(&live).await.unwrap();
        assert!(
            !store.delete_expired_lock("octo", "spoon", now).await.unwrap(),
            "a live lock must survive the conditional delete"
        );

        let expired = lock_row("octo", "fork", -60);
        store.try_insert_lock(&expired).await.unwrap();
        assert!(store.delete_expired_lock("octo", "fork", now).await.unwrap());
        assert!(store.get_lock("octo", "fork").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_rows() {
        let (_temp, store) = test_store().await;
        let now = OffsetDateTime::now_utc();

        store.try_insert_lock(&lock_row("a", "live", 300)).await.unwrap();
        store.try_insert_lock(&lock_row("b", "dead", -10)).await.unwrap();
        store.try_insert_lock(&lock_row("c", "dead", -999)).await.unwrap();

        let swept = store.sweep_expired_locks(now).await.unwrap();
        assert_eq!(swept, 2);
        assert!(store.get_lock("a", "live").await.unwrap().is_some());
        assert!(store.get_lock("b", "dead").await.unwrap().is_none());

        // At most one non-expired row per repository remains an invariant.
        assert_eq!(store.sweep_expired_locks(now).await.unwrap(), 0);
    }
}
