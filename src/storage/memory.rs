//! In-process storage used for dry runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::Entity;
use crate::storage::EntityStore;

/// Entity store backed by a map in memory.
#[derive(Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<String, Entity>>,
    batches_received: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert_batch` calls seen so far.
    pub fn batches_received(&self) -> usize {
        self.batches_received.load(Ordering::SeqCst)
    }

    /// Copy of every stored entity, ordered by id.
    pub async fn snapshot(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn initialize_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_batch(&self, entities: &[Entity]) -> Result<()> {
        self.batches_received.fetch_add(1, Ordering::SeqCst);
        let mut map = self.entities.write().await;
        for entity in entities {
            match map.get_mut(&entity.id) {
                Some(stored) => stored.merge_from(entity.clone()),
                None => {
                    map.insert(entity.id.clone(), entity.clone());
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Waits for any writer holding the lock.
        let _guard = self.entities.write().await;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entities.read().await.len())
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.entities.read().await.get(id).cloned())
    }
}
