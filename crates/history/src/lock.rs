//! Cross-process repository lock service.
//!
//! A database row per repository is the mutex: inserting it acquires the
//! lock, a background heartbeat keeps it alive, and expiry reclaims locks
//! left behind by crashed holders.

use gitpulse_core::RepoRef;
use gitpulse_core::config::LockConfig;
use gitpulse_metadata::models::LockRow;
use gitpulse_metadata::{MetadataResult, MetadataStore};
use std::sync::Arc;
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

/// Cross-process mutual exclusion bound to a repository.
///
/// `holder_id` is generated once per service instance; every row this
/// process writes carries it, so release and refresh can verify ownership.
pub struct LockService {
    store: Arc<dyn MetadataStore>,
    holder_id: Uuid,
    config: LockConfig,
}

impl LockService {
    pub fn new(store: Arc<dyn MetadataStore>, config: LockConfig) -> Self {
        Self {
            store,
            holder_id: Uuid::new_v4(),
            config,
        }
    }

    pub fn holder_id(&self) -> Uuid {
        self.holder_id
    }

    /// Attempt to acquire the refresh lock for a repository.
    ///
    /// Two attempts at most: the second follows a successful removal of an
    /// expired row. A live row held elsewhere yields `None`.
    pub async fn acquire(&self, repo: &RepoRef) -> MetadataResult<Option<LockGuard>> {
        let owner = repo.canonical_owner();
        let name = repo.canonical_name();

        for attempt in 0..2u8 {
            let now = OffsetDateTime::now_utc();
            let row = LockRow {
                lock_id: Uuid::new_v4(),
                owner: owner.clone(),
                name: name.clone(),
                locked_at: now,
                last_heartbeat_at: now,
                expires_at: now + timeout(&self.config),
                lock_holder_id: self.holder_id,
            };

            if self.store.try_insert_lock(&row).await? {
                debug!(repo = %repo, attempt, "acquired repository lock");
                return Ok(Some(LockGuard::new(
                    Arc::clone(&self.store),
                    owner,
                    name,
                    self.holder_id,
                    self.config,
                )));
            }

            match self.store.get_lock(&owner, &name).await? {
                Some(existing) if existing.expires_at <= now => {
                    // The delete re-checks expiry, so a row extended by a
                    // concurrent heartbeat survives this cleanup.
                    let removed = self.store.delete_expired_lock(&owner, &name, now).await?;
                    if removed {
                        warn!(
                            repo = %repo,
                            stale_holder = %existing.lock_holder_id,
                            "removed expired repository lock"
                        );
                    }
                }
                _ => return Ok(None),
            }
        }

        Ok(None)
    }

    /// Delete every expired lock row; returns how many were swept.
    pub async fn sweep_expired(&self) -> MetadataResult<u64> {
        self.store
            .sweep_expired_locks(OffsetDateTime::now_utc())
            .await
    }
}

fn timeout(config: &LockConfig) -> TimeDuration {
    TimeDuration::milliseconds(config.timeout_ms as i64)
}

/// A held repository lock.
///
/// A heartbeat task extends the row's expiry while the guard is alive.
/// [`LockGuard::release`] deletes the row; merely dropping the guard stops
/// the heartbeat and lets the row expire within the lock timeout, which is
/// also what happens when the process crashes.
pub struct LockGuard {
    store: Arc<dyn MetadataStore>,
    owner: String,
    name: String,
    holder_id: Uuid,
    heartbeat: JoinHandle<()>,
}

impl LockGuard {
    fn new(
        store: Arc<dyn MetadataStore>,
        owner: String,
        name: String,
        holder_id: Uuid,
        config: LockConfig,
    ) -> Self {
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&store),
            owner.clone(),
            name.clone(),
            holder_id,
            config,
        ));
        Self {
            store,
            owner,
            name,
            holder_id,
            heartbeat,
        }
    }

    /// Stop the heartbeat and delete the lock row if this process still
    /// holds it. Failures are logged, not returned: the row expires on its
    /// own and must not mask the refresh outcome.
    pub async fn release(self) {
        self.heartbeat.abort();
        match self
            .store
            .release_lock(&self.owner, &self.name, self.holder_id)
            .await
        {
            Ok(true) => debug!(owner = %self.owner, name = %self.name, "released repository lock"),
            Ok(false) => warn!(
                owner = %self.owner,
                name = %self.name,
                "repository lock was no longer held at release"
            ),
            Err(e) => warn!(
                owner = %self.owner,
                name = %self.name,
                error = %e,
                "failed to release repository lock; it will expire"
            ),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

async fn heartbeat_loop(
    store: Arc<dyn MetadataStore>,
    owner: String,
    name: String,
    holder_id: Uuid,
    config: LockConfig,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the row was just written.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = OffsetDateTime::now_utc();
        let expires_at = now + timeout(&config);
        match store
            .refresh_lock(&owner, &name, holder_id, now, expires_at)
            .await
        {
            Ok(true) => {
                debug!(owner = %owner, name = %name, "extended repository lock")
            }
            Ok(false) => {
                warn!(
                    owner = %owner,
                    name = %name,
                    "repository lock lost to another holder, stopping heartbeat"
                );
                break;
            }
            Err(e) => {
                // Transient storage trouble must not drop a healthy lock;
                // the next tick retries well before the expiry window ends.
                warn!(
                    owner = %owner,
                    name = %name,
                    error = %e,
                    "lock heartbeat failed, retrying next tick"
                );
            }
        }
    }
}
