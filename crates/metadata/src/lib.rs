//! Metadata store abstraction and implementations for gitpulse.
//!
//! This crate provides the control-plane data model:
//! - Tracked repositories and their sync bookkeeping
//! - Per-day count snapshots (append-only, upsert-repairable)
//! - Cross-process repository refresh locks with expiry

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};

use gitpulse_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            max_connections,
        } => {
            tracing::info!("connecting to PostgreSQL metadata store");
            let store = PostgresStore::from_url(url, *max_connections).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
