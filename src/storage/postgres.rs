//! PostgreSQL storage implementation.
//!
//! Core attributes map to columns; everything else lives in a JSONB
//! `metadata` column that is merged on conflict.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};

use crate::error::{AppError, Result};
use crate::models::{Entity, Metadata};
use crate::storage::EntityStore;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS repositories (
        id VARCHAR(255) PRIMARY KEY,
        name_with_owner VARCHAR(255) NOT NULL,
        stars BIGINT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

const CREATE_STARS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_repo_stars ON repositories (stars DESC)";

/// Entity store backed by a PostgreSQL connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn initialize_schema(&self) -> Result<()> {
        log::info!("Initializing database schema...");
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_STARS_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_batch(&self, entities: &[Entity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        // ON CONFLICT cannot touch the same row twice in one statement.
        let batch = Entity::coalesce(entities);

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO repositories (id, name_with_owner, stars, metadata) ");
        builder.push_values(&batch, |mut row, entity| {
            row.push_bind(&entity.id)
                .push_bind(&entity.display_name)
                .push_bind(entity.rank_score)
                .push_bind(Json(&entity.metadata));
        });
        builder.push(
            " ON CONFLICT (id) DO UPDATE SET \
                name_with_owner = EXCLUDED.name_with_owner, \
                stars = EXCLUDED.stars, \
                metadata = repositories.metadata || EXCLUDED.metadata, \
                updated_at = CURRENT_TIMESTAMP",
        );

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::storage(format!("upsert of {} rows failed: {}", batch.len(), e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Waits for checked-out connections to be returned.
        self.pool.close().await;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query(
            "SELECT id, name_with_owner, stars, metadata FROM repositories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Entity> {
            let Json(metadata): Json<Metadata> = row.try_get("metadata")?;
            Ok(Entity {
                id: row.try_get("id")?,
                display_name: row.try_get("name_with_owner")?,
                rank_score: row.try_get("stars")?,
                metadata,
            })
        })
        .transpose()
    }
}
