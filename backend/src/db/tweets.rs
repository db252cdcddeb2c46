//! Tweets repository

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use super::sqlite_helpers::{new_id, now_iso8601};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TweetRecord {
    pub id: String,
    #[serde(rename = "owner")]
    pub owner_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TweetRepository {
    pool: SqlitePool,
}

impl TweetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, owner_id: &str, content: &str) -> Result<TweetRecord> {
        let id = new_id();
        let now = now_iso8601();

        sqlx::query(
            "INSERT INTO tweets (id, owner_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to create tweet"))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<TweetRecord>> {
        let record = sqlx::query_as::<_, TweetRecord>(
            "SELECT id, owner_id, content, created_at, updated_at FROM tweets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
