//! PostgreSQL backend tests.
//!
//! These need a reachable database and are gated on
//! `GITPULSE_TEST_POSTGRES_URL`; without it the suite skips silently so
//! plain `cargo test` stays self-contained.

use gitpulse_core::ActivityCounts;
use gitpulse_metadata::PostgresStore;
use gitpulse_metadata::models::{LockRow, RepositoryRow, SnapshotRow};
use gitpulse_metadata::repos::{LockRepo, RepositoryRepo, SnapshotRepo};
use time::macros::date;
use time::{Duration as TimeDuration, OffsetDateTime};
use uuid::Uuid;

fn postgres_url() -> Option<String> {
    match std::env::var("GITPULSE_TEST_POSTGRES_URL") {
        Ok(url) if !url.trim().is_empty() => Some(url),
        _ => {
            eprintln!("GITPULSE_TEST_POSTGRES_URL not set, skipping postgres test");
            None
        }
    }
}

/// Unique owner per run so reruns against the same database never collide.
fn unique_owner() -> String {
    format!("owner-{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn snapshots_roundtrip_on_postgres() {
    let Some(url) = postgres_url() else { return };
    let store = PostgresStore::from_url(&url, 5).await.unwrap();

    let owner = unique_owner();
    let repository_id = Uuid::new_v4();
    store
        .create_repository(&RepositoryRow {
            repository_id,
            owner: owner.clone(),
            name: "roundtrip".to_string(),
            created_at: date!(2022 - 01 - 01),
            last_synced_at: None,
        })
        .await
        .unwrap();

    let counts = ActivityCounts {
        issues_created: 12,
        issues_closed: 6,
        prs_created: 4,
        prs_closed: 3,
        prs_merged: 2,
    };
    let rows = vec![
        SnapshotRow::from_counts(repository_id, date!(2022 - 02 - 01), &counts),
        SnapshotRow::from_counts(repository_id, date!(2022 - 01 - 01), &counts),
    ];
    store.upsert_snapshots(&rows).await.unwrap();
    // Same-date upsert repairs instead of duplicating.
    store.upsert_snapshots(&rows).await.unwrap();

    let listed = store.list_snapshots(repository_id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].snapshot_date, date!(2022 - 01 - 01));
    assert_eq!(listed[1].counts(), counts);
    assert_eq!(
        store.latest_snapshot_date(repository_id).await.unwrap(),
        Some(date!(2022 - 02 - 01))
    );
}

#[tokio::test]
async fn locks_exclude_and_sweep_on_postgres() {
    let Some(url) = postgres_url() else { return };
    let store = PostgresStore::from_url(&url, 5).await.unwrap();

    let owner = unique_owner();
    let now = OffsetDateTime::now_utc();
    let holder = Uuid::new_v4();
    let row = LockRow {
        lock_id: Uuid::new_v4(),
        owner: owner.clone(),
        name: "locked".to_string(),
        locked_at: now,
        last_heartbeat_at: now,
        expires_at: now + TimeDuration::seconds(120),
        lock_holder_id: holder,
    };

    assert!(store.try_insert_lock(&row).await.unwrap());
    let mut conflicting = row.clone();
    conflicting.lock_id = Uuid::new_v4();
    conflicting.lock_holder_id = Uuid::new_v4();
    assert!(!store.try_insert_lock(&conflicting).await.unwrap());

    // A live lock survives the conditional delete and foreign release.
    assert!(!store.delete_expired_lock(&owner, "locked", now).await.unwrap());
    assert!(
        !store
            .release_lock(&owner, "locked", Uuid::new_v4())
            .await
            .unwrap()
    );
    assert!(store.release_lock(&owner, "locked", holder).await.unwrap());

    // Sweep collects rows this run expired.
    let mut expired = row.clone();
    expired.lock_id = Uuid::new_v4();
    expired.name = "expired".to_string();
    expired.expires_at = now - TimeDuration::seconds(60);
    assert!(store.try_insert_lock(&expired).await.unwrap());
    assert!(store.sweep_expired_locks(now).await.unwrap() >= 1);
    assert!(store.get_lock(&owner, "expired").await.unwrap().is_none());
}
