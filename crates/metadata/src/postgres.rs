//! PostgreSQL-based metadata store implementation.

use crate::error::MetadataResult;
use crate::models::{LockRow, RepositoryRow, SnapshotRow};
use crate::repos::{LockRepo, RepositoryRepo, SnapshotRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared
        // statement, so the schema is split and executed statement by statement.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryRepo for PostgresStore {
    async fn create_repository(&self, repository: &RepositoryRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories (repository_id, owner, name, created_at, last_synced_at)
            VALUES ($1, $2, $3, $4, $5)
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
            "SELECT * FROM repositories WHERE owner = $1 AND name = $2",
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
        sqlx::query("UPDATE repositories SET last_synced_at = $1 WHERE repository_id = $2")
            .bind(synced_at)
            .bind(repository_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepo for PostgresStore {
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
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (repository_id, snapshot_date) DO UPDATE SET
                    issues_created = EXCLUDED.issues_created,
                    issues_closed = EXCLUDED.issues_closed,
                    prs_created = EXCLUDED.prs_created,
                    prs_closed = EXCLUDED.prs_closed,
                    prs_merged = EXCLUDED.prs_merged
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
            "SELECT * FROM snapshots WHERE repository_id = $1 ORDER BY snapshot_date",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn latest_snapshot_date(&self, repository_id: Uuid) -> MetadataResult<Option<Date>> {
        let date = sqlx::query_scalar::<_, Date>(
            "SELECT snapshot_date FROM snapshots WHERE repository_id = $1 \
             ORDER BY snapshot_date DESC LIMIT 1",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(date)
    }
}

#[async_trait]
impl LockRepo for PostgresStore {
    async fn try_insert_lock(&self, lock: &LockRow) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO repository_locks (
                lock_id, owner, name,
                locked_at, last_heartbeat_at, expires_at, lock_holder_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            "SELECT * FROM repository_locks WHERE owner = $1 AND name = $2",
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
            "DELETE FROM repository_locks WHERE owner = $1 AND name = $2 AND expires_at <= $3",
        )
        .bind(owner)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lock(&self, owner: &str, name: &str, holder_id: Uuid) -> MetadataResult<bool> {
        let result = sqlx::query(
            "DELETE FROM repository_locks WHERE owner = $1 AND name = $2 AND lock_holder_id = $3",
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
            "UPDATE repository_locks SET last_heartbeat_at = $1, expires_at = $2 \
             WHERE owner = $3 AND name = $4 AND lock_holder_id = $5",
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
        let result = sqlx::query("DELETE FROM repository_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_individual_statements() {
        let statements = postgres_schema_statements(POSTGRES_SCHEMA);
        assert!(statements.len() >= 4, "tables plus index expected");
        assert!(statements.iter().all(|s| !s.is_empty()));
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS repositories"));
    }
}
