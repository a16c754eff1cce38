//! Common test utilities and fixtures.
#![allow(dead_code)]

pub mod upstream;

#[allow(unused_imports)]
pub use upstream::*;

use gitpulse_core::config::{HistoryConfig, LockConfig, ResolutionConfig};
use gitpulse_history::HistoryService;
use gitpulse_github::UpstreamClient;
use gitpulse_metadata::models::{LockRow, RepositoryRow, SnapshotRow};
use gitpulse_metadata::{MetadataStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use time::{Date, Duration as TimeDuration, OffsetDateTime};
use uuid::Uuid;

/// A test metadata store backed by a temporary SQLite file.
pub struct TestStore {
    pub store: Arc<dyn MetadataStore>,
    _temp_dir: TempDir,
}

impl TestStore {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");
        let store = SqliteStore::new(temp_dir.path().join("test.db"))
            .await
            .expect("failed to open sqlite store");
        Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        Arc::clone(&self.store)
    }
}

/// History config with short waits so tests finish quickly.
pub fn fast_history_config() -> HistoryConfig {
    HistoryConfig {
        cache_freshness_hours: 24,
        lock_wait_timeout_ms: 2_000,
        lock_wait_interval_ms: 25,
    }
}

/// Lock config with short heartbeat and timeout for tests.
pub fn fast_lock_config() -> LockConfig {
    LockConfig {
        timeout_ms: 1_000,
        heartbeat_interval_ms: 200,
    }
}

/// Build a history service over the given store and upstream.
pub fn build_service(
    store: Arc<dyn MetadataStore>,
    client: Arc<dyn UpstreamClient>,
) -> HistoryService {
    HistoryService::new(
        store,
        client,
        ResolutionConfig::default(),
        fast_history_config(),
        fast_lock_config(),
    )
}

/// Insert a repository row and return its id.
#[allow(dead_code)]
pub async fn seed_repository(
    store: &Arc<dyn MetadataStore>,
    owner: &str,
    name: &str,
    created_at: Date,
) -> Uuid {
    let repository_id = Uuid::new_v4();
    store
        .create_repository(&RepositoryRow {
            repository_id,
            owner: owner.to_string(),
            name: name.to_string(),
            created_at,
            last_synced_at: None,
        })
        .await
        .expect("failed to seed repository");
    repository_id
}

/// Insert flat snapshots at the given dates with the given base count.
#[allow(dead_code)]
pub async fn seed_snapshots(
    store: &Arc<dyn MetadataStore>,
    repository_id: Uuid,
    dates: &[Date],
    base: i64,
) {
    let rows: Vec<SnapshotRow> = dates
        .iter()
        .map(|&snapshot_date| SnapshotRow {
            repository_id,
            snapshot_date,
            issues_created: base,
            issues_closed: base / 2,
            prs_created: base / 3,
            prs_closed: base / 4,
            prs_merged: base / 5,
        })
        .collect();
    store
        .upsert_snapshots(&rows)
        .await
        .expect("failed to seed snapshots");
}

/// Insert a lock row owned by some other process. Negative `expires_in_ms`
/// produces an already-expired row.
#[allow(dead_code)]
pub async fn insert_foreign_lock(
    store: &Arc<dyn MetadataStore>,
    owner: &str,
    name: &str,
    expires_in_ms: i64,
) -> Uuid {
    let holder = Uuid::new_v4();
    let now = OffsetDateTime::now_utc();
    let inserted = store
        .try_insert_lock(&LockRow {
            lock_id: Uuid::new_v4(),
            owner: owner.to_string(),
            name: name.to_string(),
            locked_at: now,
            last_heartbeat_at: now,
            expires_at: now + TimeDuration::milliseconds(expires_in_ms),
            lock_holder_id: holder,
        })
        .await
        .expect("failed to insert foreign lock");
    assert!(inserted, "foreign lock row should not conflict");
    holder
}
