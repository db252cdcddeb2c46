//! Comments repository

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use super::sqlite_helpers::{new_id, now_iso8601};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub id: String,
    #[serde(rename = "video")]
    pub video_id: String,
    #[serde(rename = "owner")]
    pub owner_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct CommentRepository {
    pool: SqlitePool,
}

impl CommentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a comment to a video. Returns `None` if the video no longer exists.
    pub async fn create(&self, video_id: &str, owner_id: &str, content: &str) -> Result<Option<CommentRecord>> {
        let id = new_id();
        let now = now_iso8601();

        let result = sqlx::query(
            "INSERT INTO comments (id, video_id, owner_id, content, created_at, updated_at) \
             SELECT ?, ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM videos WHERE id = ?)",
        )
        .bind(&id)
        .bind(video_id)
        .bind(owner_id)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .bind(video_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let comment = self
            .get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to create comment"))?;
        Ok(Some(comment))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<CommentRecord>> {
        let record = sqlx::query_as::<_, CommentRecord>(
            "SELECT id, video_id, owner_id, content, created_at, updated_at FROM comments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn update_content(&self, id: &str, content: &str) -> Result<Option<CommentRecord>> {
        sqlx::query("UPDATE comments SET content = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_by_id(id).await
    }

    /// Delete a comment and the likes on it
    pub async fn delete_cascade(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM likes WHERE comment_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
