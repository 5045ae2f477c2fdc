//! Local filesystem storage implementation.
//!
//! Upserted batches are appended to a journal so every acknowledged write is
//! on disk; `close` folds the journal into a snapshot.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── entities.json         # Snapshot: {updated_at, count, entities}
//! └── journal.jsonl         # One JSON array per upserted batch
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Entity;
use crate::storage::EntityStore;

const SNAPSHOT_KEY: &str = "entities.json";
const JOURNAL_KEY: &str = "journal.jsonl";

/// Snapshot file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// ISO 8601 timestamp of last compaction
    pub updated_at: DateTime<Utc>,
    /// Total entity count
    pub count: usize,
    /// The entities, ordered by id
    pub entities: Vec<Entity>,
}

impl StoreSnapshot {
    pub fn new(mut entities: Vec<Entity>) -> Self {
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            updated_at: Utc::now(),
            count: entities.len(),
            entities,
        }
    }
}

#[derive(Default)]
struct State {
    loaded: bool,
    entities: HashMap<String, Entity>,
}

impl State {
    fn merge(&mut self, batch: Vec<Entity>) {
        for entity in batch {
            match self.entities.get_mut(&entity.id) {
                Some(stored) => stored.merge_from(entity),
                None => {
                    self.entities.insert(entity.id.clone(), entity);
                }
            }
        }
    }
}

/// Local filesystem storage backend.
pub struct LocalStore {
    root_dir: PathBuf,
    state: Mutex<State>,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        tokio::fs::create_dir_all(&self.root_dir).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Append one batch to the journal and sync it.
    async fn append_journal(&self, batch: &[Entity]) -> Result<()> {
        let mut line = serde_json::to_vec(batch)?;
        line.push(b'\n');

        tokio::fs::create_dir_all(&self.root_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(JOURNAL_KEY))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Load snapshot and replay the journal, once.
    async fn ensure_loaded(&self, state: &mut State) -> Result<()> {
        if state.loaded {
            return Ok(());
        }

        let mut fresh = State::default();
        if let Some(snapshot) = self.read_json::<StoreSnapshot>(SNAPSHOT_KEY).await? {
            fresh.merge(snapshot.entities);
        }

        let mut replayed = 0;
        if let Some(bytes) = self.read_bytes(JOURNAL_KEY).await? {
            for (n, line) in bytes.split(|b| *b == b'\n').enumerate() {
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<Vec<Entity>>(line) {
                    Ok(batch) => {
                        fresh.merge(batch);
                        replayed += 1;
                    }
                    Err(e) => log::warn!(
                        "Skipping unreadable journal line {} in {}: {}",
                        n + 1,
                        self.root_dir.display(),
                        e
                    ),
                }
            }

            // Terminate a torn tail so the next batch starts on its own line.
            if bytes.last().is_some_and(|b| *b != b'\n') {
                let mut file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .open(self.path(JOURNAL_KEY))
                    .await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
            }
        }

        log::debug!(
            "Loaded {} entities from {} ({} journal batches)",
            fresh.entities.len(),
            self.root_dir.display(),
            replayed
        );
        fresh.loaded = true;
        *state = fresh;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for LocalStore {
    async fn initialize_schema(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await
    }

    async fn upsert_batch(&self, entities: &[Entity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let batch = Entity::coalesce(entities);

        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        self.append_journal(&batch).await.map_err(|e| {
            AppError::storage(format!(
                "failed to append {} entities to {}: {}",
                batch.len(),
                self.path(JOURNAL_KEY).display(),
                e
            ))
        })?;
        state.merge(batch);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Holding the lock means no upsert is mid-write.
        let state = self.state.lock().await;
        if !state.loaded {
            return Ok(());
        }

        let snapshot = StoreSnapshot::new(state.entities.values().cloned().collect());
        self.write_json(SNAPSHOT_KEY, &snapshot).await?;
        match tokio::fs::remove_file(self.path(JOURNAL_KEY)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::Io(e)),
        }

        log::info!(
            "Snapshot: {} entities written to {}",
            snapshot.count,
            self.path(SNAPSHOT_KEY).display()
        );
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(state.entities.len())
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(state.entities.get(id).cloned())
    }
}
