//! Storage abstractions for entity persistence.
//!
//! Every backend upserts by entity `id`: scalar fields are overwritten and
//! metadata is merged, so delivering the same batch twice leaves the store
//! exactly as delivering it once.
//!
//! ## Local Directory Structure
//!
//! ```text
//! storage/
//! ├── entities.json         # Snapshot written on close
//! └── journal.jsonl         # Batches appended since the last snapshot
//! ```

pub mod local;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Entity, StorageBackend, StorageConfig};

// Re-export for convenience
pub use local::LocalStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Trait for entity storage backends.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Prepare the backend. Safe to call on every run.
    async fn initialize_schema(&self) -> Result<()>;

    /// Insert or update each entity by `id`.
    async fn upsert_batch(&self, entities: &[Entity]) -> Result<()>;

    /// Flush pending writes and release resources.
    async fn close(&self) -> Result<()>;

    /// Number of stored entities.
    async fn count(&self) -> Result<usize>;

    /// Look up a stored entity.
    async fn get(&self, id: &str) -> Result<Option<Entity>>;
}

/// Open the backend selected in `config`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn EntityStore>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalStore::new(&config.path))),
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &StorageConfig) -> Result<Arc<dyn EntityStore>> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| AppError::config("postgres backend requires a database URL"))?;
    Ok(Arc::new(PgStore::connect(url).await?))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &StorageConfig) -> Result<Arc<dyn EntityStore>> {
    Err(AppError::config(
        "postgres backend requested but the crate was built without the `postgres` feature",
    ))
}
