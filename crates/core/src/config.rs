//! Configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upstream GraphQL client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Bearer token for the upstream GraphQL endpoint.
    pub token: String,
    /// GraphQL endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Maximum number of probe dates packed into one batched query.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_endpoint() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_max_batch() -> usize {
    12
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(Error::Config("upstream token must not be empty".into()));
        }
        if self.max_batch == 0 {
            return Err(Error::Config("upstream max_batch must be at least 1".into()));
        }
        Ok(())
    }
}

/// Adaptive discovery configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Maximum tolerated per-component count delta within a segment before
    /// it must be subdivided.
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    /// Segments longer than this are subdivided regardless of count delta.
    #[serde(default = "default_max_interval_days")]
    pub max_interval_days: i64,
    /// Segments at or below this length are never subdivided.
    #[serde(default = "default_min_interval_days")]
    pub min_interval_days: i64,
}

fn default_threshold() -> u64 {
    50
}

fn default_max_interval_days() -> i64 {
    30
}

fn default_min_interval_days() -> i64 {
    1
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_interval_days: default_max_interval_days(),
            min_interval_days: default_min_interval_days(),
        }
    }
}

impl ResolutionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval_days < 1 {
            return Err(Error::Config(
                "resolution min_interval_days must be at least 1".into(),
            ));
        }
        if self.max_interval_days < self.min_interval_days {
            return Err(Error::Config(format!(
                "resolution max_interval_days {} is below min_interval_days {}",
                self.max_interval_days, self.min_interval_days
            )));
        }
        Ok(())
    }
}

/// Cache freshness and lock-wait configuration for the history service.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// A cached timeline whose latest snapshot is within this window of
    /// today counts as fresh and is served without a refresh.
    #[serde(default = "default_cache_freshness_hours")]
    pub cache_freshness_hours: i64,
    /// Maximum time to wait for another worker's refresh before failing.
    #[serde(default = "default_lock_wait_timeout_ms")]
    pub lock_wait_timeout_ms: u64,
    /// Polling cadence while waiting for another worker's refresh.
    #[serde(default = "default_lock_wait_interval_ms")]
    pub lock_wait_interval_ms: u64,
}

fn default_cache_freshness_hours() -> i64 {
    24
}

fn default_lock_wait_timeout_ms() -> u64 {
    120_000
}

fn default_lock_wait_interval_ms() -> u64 {
    2_000
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            cache_freshness_hours: default_cache_freshness_hours(),
            lock_wait_timeout_ms: default_lock_wait_timeout_ms(),
            lock_wait_interval_ms: default_lock_wait_interval_ms(),
        }
    }
}

impl HistoryConfig {
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn lock_wait_interval(&self) -> Duration {
        Duration::from_millis(self.lock_wait_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_freshness_hours < 0 {
            return Err(Error::Config(
                "history cache_freshness_hours must not be negative".into(),
            ));
        }
        if self.lock_wait_interval_ms == 0 {
            return Err(Error::Config(
                "history lock_wait_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Cross-process repository lock configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// A lock row not heartbeated within this window may be reclaimed.
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
    /// Heartbeat period while a lock is held.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    120_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// The timeout must comfortably exceed the heartbeat period, otherwise a
    /// healthy holder could lose its lock between two ticks.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::Config(
                "lock heartbeat_interval_ms must be at least 1".into(),
            ));
        }
        if self.timeout_ms < self.heartbeat_interval_ms.saturating_mul(2) {
            return Err(Error::Config(format!(
                "lock timeout_ms {} must be at least twice heartbeat_interval_ms {}",
                self.timeout_ms, self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// Local SQLite database file.
    Sqlite { path: PathBuf },
    /// PostgreSQL via connection URL.
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

impl MetadataConfig {
    /// Parse a `DB_URL`-style connection string into a backend choice.
    ///
    /// `postgres://` and `postgresql://` select PostgreSQL; a `sqlite:`
    /// prefix or a bare filesystem path selects SQLite.
    pub fn from_url(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::Config("DB_URL must not be empty".into()));
        }
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            return Ok(Self::Postgres {
                url: trimmed.to_string(),
                max_connections: default_max_connections(),
            });
        }
        let path = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
        Ok(Self::Sqlite {
            path: PathBuf::from(path),
        })
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream client configuration.
    pub upstream: UpstreamConfig,
    /// Metadata store configuration.
    pub metadata: MetadataConfig,
    /// Adaptive discovery tuning.
    #[serde(default)]
    pub resolution: ResolutionConfig,
    /// History service cache and wait tuning.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Repository lock tuning.
    #[serde(default)]
    pub lock: LockConfig,
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// `UPSTREAM_TOKEN` and `DB_URL` are required; everything else falls
    /// back to its default when unset.
    pub fn from_env() -> Result<Self> {
        let upstream = UpstreamConfig {
            token: require_env("UPSTREAM_TOKEN")?,
            endpoint: optional_env("UPSTREAM_ENDPOINT").unwrap_or_else(default_endpoint),
            max_batch: parse_env("UPSTREAM_MAX_BATCH")?.unwrap_or_else(default_max_batch),
        };
        let metadata = MetadataConfig::from_url(&require_env("DB_URL")?)?;
        let resolution = ResolutionConfig {
            threshold: parse_env("BINARY_SEARCH_THRESHOLD")?.unwrap_or_else(default_threshold),
            max_interval_days: parse_env("BINARY_SEARCH_MAX_INTERVAL")?
                .unwrap_or_else(default_max_interval_days),
            min_interval_days: parse_env("BINARY_SEARCH_MIN_INTERVAL")?
                .unwrap_or_else(default_min_interval_days),
        };
        let history = HistoryConfig {
            cache_freshness_hours: parse_env("CACHE_FRESHNESS_HOURS")?
                .unwrap_or_else(default_cache_freshness_hours),
            lock_wait_timeout_ms: parse_env("LOCK_WAIT_TIMEOUT_MS")?
                .unwrap_or_else(default_lock_wait_timeout_ms),
            lock_wait_interval_ms: parse_env("LOCK_WAIT_INTERVAL_MS")?
                .unwrap_or_else(default_lock_wait_interval_ms),
        };
        let lock = LockConfig {
            timeout_ms: parse_env("LOCK_TIMEOUT_MS")?.unwrap_or_else(default_lock_timeout_ms),
            heartbeat_interval_ms: parse_env("HEARTBEAT_INTERVAL_MS")?
                .unwrap_or_else(default_heartbeat_interval_ms),
        };

        let config = Self {
            upstream,
            metadata,
            resolution,
            history,
            lock,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections together.
    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        self.resolution.validate()?;
        self.history.validate()?;
        self.lock.validate()?;
        Ok(())
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses an in-memory SQLite store and a dummy
    /// upstream token.
    pub fn for_testing() -> Self {
        Self {
            upstream: UpstreamConfig {
                token: "test-token".to_string(),
                endpoint: default_endpoint(),
                max_batch: default_max_batch(),
            },
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
            },
            resolution: ResolutionConfig::default(),
            history: HistoryConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!(
            "{key} environment variable is required"
        ))),
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key} is invalid: {e}"))),
        None => Ok(None),
    }
}
