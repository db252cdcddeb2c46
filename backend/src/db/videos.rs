//! Videos repository

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

use super::AssetRef;
use super::sqlite_helpers::{from_json, new_id, now_iso8601, to_json};

const VIDEO_COLUMNS: &str = "id, owner_id, video_file, thumbnail, title, description, duration, \
                             views, is_published, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    #[serde(rename = "owner")]
    pub owner_id: String,
    pub video_file: AssetRef,
    pub thumbnail: AssetRef,
    pub title: String,
    pub description: String,
    /// Seconds
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl VideoRecord {
    /// Published videos are visible to everyone, drafts only to their owner.
    pub fn is_visible_to(&self, viewer: Option<&str>) -> bool {
        self.is_published || viewer == Some(self.owner_id.as_str())
    }
}

impl sqlx::FromRow<'_, SqliteRow> for VideoRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let video_file: String = row.try_get("video_file")?;
        let thumbnail: String = row.try_get("thumbnail")?;
        let is_published: i64 = row.try_get("is_published")?;

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            video_file: from_json(&video_file).map_err(|e| sqlx::Error::Decode(e.into()))?,
            thumbnail: from_json(&thumbnail).map_err(|e| sqlx::Error::Decode(e.into()))?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            duration: row.try_get("duration")?,
            views: row.try_get("views")?,
            is_published: is_published != 0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateVideo {
    pub owner_id: String,
    pub video_file: AssetRef,
    pub thumbnail: AssetRef,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub is_published: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateVideo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<AssetRef>,
}

pub struct VideoRepository {
    pool: SqlitePool,
}

impl VideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, video: CreateVideo) -> Result<VideoRecord> {
        let id = new_id();
        let now = now_iso8601();

        sqlx::query(
            r#"
            INSERT INTO videos (id, owner_id, video_file, thumbnail, title, description, duration,
                                views, is_published, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&video.owner_id)
        .bind(to_json(&video.video_file))
        .bind(to_json(&video.thumbnail))
        .bind(&video.title)
        .bind(&video.description)
        .bind(video.duration)
        .bind(video.is_published as i32)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to create video"))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<VideoRecord>> {
        let record = sqlx::query_as::<_, VideoRecord>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Apply the set fields; unset fields keep their value
    pub async fn update(&self, id: &str, update: UpdateVideo) -> Result<Option<VideoRecord>> {
        sqlx::query(
            r#"
            UPDATE videos
            SET title = COALESCE(?, title),
                description = COALESCE(?, description),
                thumbnail = COALESCE(?, thumbnail),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.title)
        .bind(update.description)
        .bind(update.thumbnail.as_ref().map(to_json))
        .bind(now_iso8601())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_by_id(id).await
    }

    /// Flip the publish flag. Returns the new value, or `None` if the video
    /// does not exist.
    pub async fn toggle_published(&self, id: &str) -> Result<Option<bool>> {
        let flag = sqlx::query_scalar::<_, i64>(
            "UPDATE videos SET is_published = 1 - is_published, updated_at = ? WHERE id = ? RETURNING is_published",
        )
        .bind(now_iso8601())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(flag.map(|v| v != 0))
    }

    pub async fn increment_views(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE videos SET views = views + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete a video with its comments, the likes on those comments and the
    /// likes on the video itself, in one transaction.
    pub async fn delete_cascade(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM likes WHERE comment_id IN (SELECT id FROM comments WHERE video_id = ?)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM likes WHERE video_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM comments WHERE video_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM videos WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
