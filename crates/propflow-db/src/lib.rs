//! Item store and migration state store.
//!
//! The pipeline talks to both through the [`ItemStore`] and [`RunStore`]
//! traits. Postgres backs them in deployments; the in-memory versions serve
//! local runs and tests.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use memory::{InMemoryItemStore, InMemoryRunStore};
#[cfg(feature = "postgres")]
pub use postgres::{setup_database, PostgresItemStore, PostgresRunStore};
pub use store::{ControlLease, ItemStore, RunStore};

use propflow_core::PipelineConfig;
use std::sync::Arc;

/// Pick Postgres when `DATABASE_URL` is set, otherwise in-memory stores.
pub async fn create_stores(
    config: &PipelineConfig,
) -> anyhow::Result<(Arc<dyn ItemStore>, Arc<dyn RunStore>)> {
    match config.database_url.as_deref() {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let pool = setup_database(url, config.db_max_connections).await?;
            Ok((
                Arc::new(PostgresItemStore::new(pool.clone())),
                Arc::new(PostgresRunStore::new(pool)),
            ))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => anyhow::bail!("DATABASE_URL is set but the postgres feature is not enabled"),
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory item and run stores");
            Ok((
                Arc::new(InMemoryItemStore::new()),
                Arc::new(InMemoryRunStore::new()),
            ))
        }
    }
}
