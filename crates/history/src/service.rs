//! History service facade.
//!
//! The single entry point external collaborators consume. Serves cached
//! timelines while they are fresh, refreshes them under the cross-process
//! repository lock when stale, coalesces concurrent in-process callers,
//! and returns stale data rather than blocking when another worker is
//! already refreshing.

use crate::error::{HistoryError, HistoryResult};
use crate::fetcher::discover_range;
use crate::lock::{LockGuard, LockService};
use crate::singleflight::{Flight, FlightOutcome, SingleFlight};
use gitpulse_core::config::{AppConfig, HistoryConfig, LockConfig, ResolutionConfig};
use gitpulse_core::{ActivityCounts, RepoRef, TimelinePoint, day_span, today_utc};
use gitpulse_github::{GithubClient, UpstreamClient};
use gitpulse_metadata::models::{RepositoryRow, SnapshotRow};
use gitpulse_metadata::{MetadataError, MetadataStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

type TimelineFlights = SingleFlight<Vec<TimelinePoint>, HistoryError>;

/// Cached repository state loaded ahead of a refresh decision.
struct CachedState {
    record: RepositoryRow,
    snapshots: Vec<SnapshotRow>,
    latest: Date,
}

/// Facade over the fetcher, the metadata store, the repository lock and
/// the in-process single-flight map.
pub struct HistoryService {
    store: Arc<dyn MetadataStore>,
    client: Arc<dyn UpstreamClient>,
    locks: LockService,
    flights: TimelineFlights,
    resolution: ResolutionConfig,
    config: HistoryConfig,
}

impl HistoryService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        client: Arc<dyn UpstreamClient>,
        resolution: ResolutionConfig,
        config: HistoryConfig,
        lock_config: LockConfig,
    ) -> Self {
        let locks = LockService::new(Arc::clone(&store), lock_config);
        Self {
            store,
            client,
            locks,
            flights: SingleFlight::new(),
            resolution,
            config,
        }
    }

    /// Build a full service from application configuration.
    pub async fn from_config(config: &AppConfig) -> HistoryResult<Self> {
        let store = gitpulse_metadata::from_config(&config.metadata).await?;
        let client: Arc<dyn UpstreamClient> = Arc::new(GithubClient::new(&config.upstream)?);
        Ok(Self::new(
            store,
            client,
            config.resolution,
            config.history,
            config.lock,
        ))
    }

    /// The lock service this instance coordinates through.
    pub fn locks(&self) -> &LockService {
        &self.locks
    }

    /// Produce the sorted per-day timeline for a repository.
    ///
    /// Fresh cache is served directly. A stale cache triggers a refresh
    /// under the cross-process lock, or is served as-is when another worker
    /// already refreshes. With no usable cache the call waits, bounded by
    /// the configured timeout, for a concurrent refresh to land.
    pub async fn get_timeline(&self, owner: &str, name: &str) -> HistoryResult<Vec<TimelinePoint>> {
        let repo = RepoRef::new(owner, name)?;
        // Sole source of time-derived input for the whole refresh; the
        // fetcher and the client never read the clock.
        let today = today_utc();

        let record = self
            .store
            .get_repository(&repo.canonical_owner(), &repo.canonical_name())
            .await?;

        let cached = match record {
            Some(record) => {
                let snapshots = self.store.list_snapshots(record.repository_id).await?;
                match snapshots.last().map(|s| s.snapshot_date) {
                    Some(latest) if self.is_fresh(latest, today) => {
                        debug!(repo = %repo, %latest, "serving fresh cached timeline");
                        return Ok(to_points(&snapshots));
                    }
                    Some(latest) => Some(CachedState {
                        record,
                        snapshots,
                        latest,
                    }),
                    // A repository row without snapshots is treated as cold.
                    None => None,
                }
            }
            None => None,
        };

        self.refresh(&repo, cached, today).await
    }

    fn is_fresh(&self, latest: Date, today: Date) -> bool {
        day_span(latest, today).saturating_mul(24) <= self.config.cache_freshness_hours
    }

    async fn refresh(
        &self,
        repo: &RepoRef,
        cached: Option<CachedState>,
        today: Date,
    ) -> HistoryResult<Vec<TimelinePoint>> {
        match self.locks.acquire(repo).await? {
            Some(guard) => self.refresh_as_leader(repo, cached, today, guard).await,
            None => {
                if let Some(state) = cached {
                    // Stale-but-usable: another worker is refreshing; a
                    // slightly outdated chart beats a blocked request.
                    info!(repo = %repo, "lock held elsewhere, serving stale cached timeline");
                    return Ok(to_points(&state.snapshots));
                }
                self.wait_for_refresh(repo).await
            }
        }
    }

    async fn refresh_as_leader(
        &self,
        repo: &RepoRef,
        cached: Option<CachedState>,
        today: Date,
        guard: LockGuard,
    ) -> HistoryResult<Vec<TimelinePoint>> {
        // The database lock serialises workers across processes; the flight
        // coalesces callers inside this one.
        let leader = match self.flights.join(&repo.cache_key()) {
            Flight::Leader(leader) => leader,
            Flight::Follower(rx) => {
                // Shouldn't happen while we hold the lock; yield to the
                // in-process fetch rather than racing it.
                guard.release().await;
                return match await_flight(rx).await {
                    Some(outcome) => outcome,
                    None => Err(HistoryError::Busy {
                        owner: repo.owner().to_string(),
                        name: repo.name().to_string(),
                    }),
                };
            }
        };

        let result = self.run_refresh(repo, cached, today).await;
        // The lock is released on success and on every error path alike.
        guard.release().await;

        match result {
            Ok(points) => {
                leader.complete(Ok(Arc::new(points.clone())));
                Ok(points)
            }
            Err(error) => {
                let shared = Arc::new(error);
                leader.complete(Err(Arc::clone(&shared)));
                // Without followers the broadcast dropped its clone and the
                // original error travels back intact; with followers each
                // party gets the shared form.
                match Arc::try_unwrap(shared) {
                    Ok(original) => Err(original),
                    Err(shared) => Err(HistoryError::Shared(shared)),
                }
            }
        }
    }

    async fn run_refresh(
        &self,
        repo: &RepoRef,
        cached: Option<CachedState>,
        today: Date,
    ) -> HistoryResult<Vec<TimelinePoint>> {
        match cached {
            None => self.discover_cold(repo, today).await,
            Some(state) => self.refresh_incremental(repo, state, today).await,
        }
    }

    /// First sighting of a repository: resolve its metadata, then discover
    /// the whole `[created, today]` range.
    async fn discover_cold(&self, repo: &RepoRef, today: Date) -> HistoryResult<Vec<TimelinePoint>> {
        let upstream = self.client.repository_info(repo).await?;
        info!(
            repo = %repo,
            created_at = %upstream.created_at,
            issues = upstream.total_issues,
            prs = upstream.total_prs,
            "discovering repository history"
        );

        let record = RepositoryRow {
            repository_id: Uuid::new_v4(),
            owner: repo.canonical_owner(),
            name: repo.canonical_name(),
            created_at: upstream.created_at,
            last_synced_at: None,
        };
        self.store.create_repository(&record).await?;
        // A concurrent creator may have won the insert; the stored row is
        // authoritative.
        let record = self
            .store
            .get_repository(&repo.canonical_owner(), &repo.canonical_name())
            .await?
            .ok_or_else(|| {
                HistoryError::Storage(MetadataError::Internal(
                    "repository row vanished after creation".to_string(),
                ))
            })?;

        let start = record.created_at.min(today);
        let points =
            discover_range(self.client.as_ref(), repo, &self.resolution, start, today).await?;

        self.persist(record.repository_id, &points).await?;
        Ok(points_vec(points))
    }

    /// Stale cache: discover only `[latest, today]` and merge over the
    /// cached points, the fresh fetch winning on colliding dates.
    async fn refresh_incremental(
        &self,
        repo: &RepoRef,
        state: CachedState,
        today: Date,
    ) -> HistoryResult<Vec<TimelinePoint>> {
        let start = state.latest.min(today);
        let fresh =
            discover_range(self.client.as_ref(), repo, &self.resolution, start, today).await?;
        debug!(repo = %repo, fresh = fresh.len(), "incremental refresh fetched");

        self.persist(state.record.repository_id, &fresh).await?;

        let mut merged: BTreeMap<Date, ActivityCounts> = state
            .snapshots
            .iter()
            .map(|s| (s.snapshot_date, s.counts()))
            .collect();
        merged.extend(fresh);
        Ok(points_vec(merged))
    }

    /// Persist a completed fetch. Nothing is written until the whole fetch
    /// succeeded, so a rate-limited discovery leaves the cache untouched.
    async fn persist(
        &self,
        repository_id: Uuid,
        points: &BTreeMap<Date, ActivityCounts>,
    ) -> HistoryResult<()> {
        let rows: Vec<SnapshotRow> = points
            .iter()
            .map(|(date, counts)| SnapshotRow::from_counts(repository_id, *date, counts))
            .collect();
        self.store.upsert_snapshots(&rows).await?;
        self.store
            .touch_last_synced(repository_id, OffsetDateTime::now_utc())
            .await?;
        Ok(())
    }

    /// Wait path: no lock, no usable cache. Poll for an in-process flight
    /// to await or for snapshots to appear in the database, giving up with
    /// `Busy` after the configured budget.
    async fn wait_for_refresh(&self, repo: &RepoRef) -> HistoryResult<Vec<TimelinePoint>> {
        let key = repo.cache_key();
        let deadline = Instant::now() + self.config.lock_wait_timeout();

        loop {
            if let Some(rx) = self.flights.subscribe(&key) {
                if let Some(outcome) = await_flight(rx).await {
                    return outcome;
                }
                // The leader vanished without an outcome; check the
                // database like any other round.
            }

            if let Some(record) = self
                .store
                .get_repository(&repo.canonical_owner(), &repo.canonical_name())
                .await?
            {
                let snapshots = self.store.list_snapshots(record.repository_id).await?;
                if !snapshots.is_empty() {
                    debug!(repo = %repo, "another worker's refresh landed while waiting");
                    return Ok(to_points(&snapshots));
                }
            }

            if Instant::now() >= deadline {
                return Err(HistoryError::Busy {
                    owner: repo.owner().to_string(),
                    name: repo.name().to_string(),
                });
            }
            tokio::time::sleep(self.config.lock_wait_interval()).await;
        }
    }
}

/// Await a flight outcome; `None` when the leader disappeared without one.
async fn await_flight(
    mut rx: tokio::sync::broadcast::Receiver<FlightOutcome<Vec<TimelinePoint>, HistoryError>>,
) -> Option<HistoryResult<Vec<TimelinePoint>>> {
    match rx.recv().await {
        Ok(Ok(points)) => Some(Ok(points.as_ref().clone())),
        Ok(Err(error)) => Some(Err(HistoryError::Shared(error))),
        Err(_) => None,
    }
}

fn to_points(snapshots: &[SnapshotRow]) -> Vec<TimelinePoint> {
    snapshots
        .iter()
        .map(|s| TimelinePoint {
            date: s.snapshot_date,
            counts: s.counts(),
        })
        .collect()
}

fn points_vec(points: BTreeMap<Date, ActivityCounts>) -> Vec<TimelinePoint> {
    points
        .into_iter()
        .map(|(date, counts)| TimelinePoint { date, counts })
        .collect()
}
