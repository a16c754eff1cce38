//! GitHub GraphQL batch client.

use crate::error::{GithubError, GithubResult};
use crate::query::{counts_document, rate_limit_document, repository_info_document};
use crate::response::{
    GraphQlError, GraphQlResponse, classify_errors, decode_counts, decode_rate_limit,
    decode_repository_info,
};
use async_trait::async_trait;
use gitpulse_core::config::UpstreamConfig;
use gitpulse_core::{ActivityCounts, RepoRef};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use time::{Date, OffsetDateTime};
use tracing::debug;

/// Repository metadata as reported by upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryInfo {
    /// Creation day, UTC.
    pub created_at: Date,
    pub total_issues: u64,
    pub total_prs: u64,
}

/// Last observed upstream quota window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u64,
    pub reset_at: Option<OffsetDateTime>,
}

/// The seam the fetcher and history service consume.
///
/// Implementations must not retry internally: `RateLimited` and `Transport`
/// are surfaced unchanged so the caller owns the retry policy.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Repository metadata; `NotFound` when the repository does not exist.
    async fn repository_info(&self, repo: &RepoRef) -> GithubResult<RepositoryInfo>;

    /// Count tuples for the given probe dates, keyed by date.
    ///
    /// Each component counts items strictly before the date. An empty input
    /// returns an empty map without a network call; more dates than
    /// `max_batch()` is a programmer error (`BatchTooLarge`).
    async fn counts_at(
        &self,
        repo: &RepoRef,
        dates: &[Date],
    ) -> GithubResult<BTreeMap<Date, ActivityCounts>>;

    /// Current quota window.
    async fn rate_limit(&self) -> GithubResult<RateLimitInfo>;

    /// Hard per-call probe-date ceiling.
    fn max_batch(&self) -> usize;
}

/// Client for the GitHub GraphQL endpoint.
pub struct GithubClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    max_batch: usize,
    requests_sent: AtomicU64,
    last_rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl GithubClient {
    pub fn new(config: &UpstreamConfig) -> GithubResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gitpulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            max_batch: config.max_batch,
            requests_sent: AtomicU64::new(0),
            last_rate_limit: Mutex::new(None),
        })
    }

    /// Number of upstream calls issued by this process (observability).
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// The quota window seen on the most recent reply, if any.
    pub fn last_rate_limit(&self) -> Option<RateLimitInfo> {
        *self.last_rate_limit.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn execute(&self, document: String) -> GithubResult<(Option<Value>, Vec<GraphQlError>)> {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "query": document }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GithubError::Transport(format!(
                "upstream returned {status}: {}",
                body.trim()
            )));
        }

        let parsed: GraphQlResponse = serde_json::from_str(&body)
            .map_err(|e| GithubError::Protocol(format!("invalid JSON reply: {e}")))?;

        if let Some(data) = parsed.data.as_ref() {
            if let Some(info) = decode_rate_limit(data) {
                debug!(remaining = info.remaining, "observed upstream quota");
                *self
                    .last_rate_limit
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(info);
            }
        }

        Ok((parsed.data, parsed.errors))
    }

    /// Attach the last observed reset instant to a bare rate-limit error.
    fn enrich(&self, error: GithubError) -> GithubError {
        match error {
            GithubError::RateLimited { reset_at: None } => GithubError::RateLimited {
                reset_at: self.last_rate_limit().and_then(|info| info.reset_at),
            },
            other => other,
        }
    }
}

#[async_trait]
impl UpstreamClient for GithubClient {
    async fn repository_info(&self, repo: &RepoRef) -> GithubResult<RepositoryInfo> {
        let (data, errors) = self.execute(repository_info_document(repo)).await?;
        if !errors.is_empty() {
            return Err(self.enrich(classify_errors(repo, &errors)));
        }
        let data = data.ok_or_else(|| {
            GithubError::Protocol("reply carried neither data nor errors".into())
        })?;
        decode_repository_info(repo, &data)
    }

    async fn counts_at(
        &self,
        repo: &RepoRef,
        dates: &[Date],
    ) -> GithubResult<BTreeMap<Date, ActivityCounts>> {
        if dates.len() > self.max_batch {
            return Err(GithubError::BatchTooLarge {
                requested: dates.len(),
                max: self.max_batch,
            });
        }
        if dates.is_empty() {
            return Ok(BTreeMap::new());
        }

        debug!(repo = %repo, probes = dates.len(), "issuing batched count probe");
        let (data, errors) = self.execute(counts_document(repo, dates)).await?;
        if !errors.is_empty() {
            return Err(self.enrich(classify_errors(repo, &errors)));
        }
        let data = data.ok_or_else(|| {
            GithubError::Protocol("reply carried neither data nor errors".into())
        })?;
        Ok(decode_counts(&data, dates))
    }

    async fn rate_limit(&self) -> GithubResult<RateLimitInfo> {
        let (data, errors) = self.execute(rate_limit_document()).await?;
        if !errors.is_empty() {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(GithubError::Protocol(messages.join("; ")));
        }
        data.as_ref()
            .and_then(decode_rate_limit)
            .ok_or_else(|| GithubError::Protocol("reply is missing rateLimit".into()))
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }
}
