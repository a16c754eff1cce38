//! Scripted upstream client for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use gitpulse_core::{ActivityCounts, RepoRef, day_span};
use gitpulse_github::client::{RateLimitInfo, RepositoryInfo, UpstreamClient};
use gitpulse_github::error::{GithubError, GithubResult};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::Date;

/// A scripted upstream answering probes from a per-day profile function.
pub struct FakeUpstream {
    created_at: Date,
    profile: Box<dyn Fn(Date) -> ActivityCounts + Send + Sync>,
    max_batch: usize,
    /// When set, `repository_info` reports the repository as missing.
    pub not_found: bool,
    /// Fail the nth `counts_at` call (1-based) with `RateLimited`.
    pub fail_counts_call: Option<u64>,
    /// Artificial latency inside `counts_at`, to force caller overlap.
    pub counts_delay: Option<Duration>,
    info_calls: AtomicU64,
    counts_calls: Mutex<Vec<Vec<Date>>>,
}

impl FakeUpstream {
    /// Counts growing linearly with the day offset from `created_at`.
    pub fn linear(created_at: Date, per_day: u64) -> Self {
        Self::with_profile(created_at, move |d| {
            let days = day_span(created_at, d).max(0) as u64;
            ActivityCounts {
                issues_created: days * per_day,
                issues_closed: days * per_day / 2,
                prs_created: days * per_day / 3,
                prs_closed: days * per_day / 4,
                prs_merged: days * per_day / 5,
            }
        })
    }

    /// Identical counts at every probe date.
    pub fn flat(created_at: Date, value: u64) -> Self {
        Self::with_profile(created_at, move |_| ActivityCounts {
            issues_created: value,
            issues_closed: value,
            prs_created: value,
            prs_closed: value,
            prs_merged: value,
        })
    }

    pub fn with_profile(
        created_at: Date,
        profile: impl Fn(Date) -> ActivityCounts + Send + Sync + 'static,
    ) -> Self {
        Self {
            created_at,
            profile: Box::new(profile),
            max_batch: 12,
            not_found: false,
            fail_counts_call: None,
            counts_delay: None,
            info_calls: AtomicU64::new(0),
            counts_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn info_calls(&self) -> u64 {
        self.info_calls.load(Ordering::Relaxed)
    }

    pub fn counts_calls(&self) -> Vec<Vec<Date>> {
        self.counts_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn repository_info(&self, repo: &RepoRef) -> GithubResult<RepositoryInfo> {
        self.info_calls.fetch_add(1, Ordering::Relaxed);
        if self.not_found {
            return Err(GithubError::NotFound {
                owner: repo.owner().to_string(),
                name: repo.name().to_string(),
            });
        }
        Ok(RepositoryInfo {
            created_at: self.created_at,
            total_issues: 100,
            total_prs: 50,
        })
    }

    async fn counts_at(
        &self,
        _repo: &RepoRef,
        dates: &[Date],
    ) -> GithubResult<BTreeMap<Date, ActivityCounts>> {
        assert!(
            dates.len() <= self.max_batch,
            "batch of {} exceeds ceiling {}",
            dates.len(),
            self.max_batch
        );
        let call_index = {
            let mut calls = self.counts_calls.lock().unwrap();
            calls.push(dates.to_vec());
            calls.len() as u64
        };
        if let Some(delay) = self.counts_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_counts_call == Some(call_index) {
            return Err(GithubError::RateLimited { reset_at: None });
        }
        Ok(dates.iter().map(|&d| (d, (self.profile)(d))).collect())
    }

    async fn rate_limit(&self) -> GithubResult<RateLimitInfo> {
        Ok(RateLimitInfo {
            remaining: 5_000,
            reset_at: None,
        })
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }
}
