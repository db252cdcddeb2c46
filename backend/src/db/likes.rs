//! Likes repository
//!
//! A like points at exactly one target. Partial unique indexes keep at most
//! one like per (actor, target), so [`LikeRepository::insert`] reports a
//! conflict as [`LikeInsert::AlreadyLiked`] instead of failing. The insert
//! only lands while the target row exists, so a like can never outlive a
//! concurrent delete of its target.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use super::sqlite_helpers::{new_id, now_iso8601};

/// The kind of entity a like points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LikeTarget {
    Video,
    Comment,
    Tweet,
}

impl LikeTarget {
    fn column(&self) -> &'static str {
        match self {
            LikeTarget::Video => "video_id",
            LikeTarget::Comment => "comment_id",
            LikeTarget::Tweet => "tweet_id",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            LikeTarget::Video => "videos",
            LikeTarget::Comment => "comments",
            LikeTarget::Tweet => "tweets",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LikeTarget::Video => "video",
            LikeTarget::Comment => "comment",
            LikeTarget::Tweet => "tweet",
        }
    }
}

/// Result of [`LikeRepository::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeInsert {
    Inserted,
    AlreadyLiked,
    TargetMissing,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    pub id: String,
    #[serde(rename = "video")]
    pub video_id: Option<String>,
    #[serde(rename = "comment")]
    pub comment_id: Option<String>,
    #[serde(rename = "tweet")]
    pub tweet_id: Option<String>,
    pub liked_by: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct LikeRepository {
    pool: SqlitePool,
}

impl LikeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The actor's like on a target, if any
    pub async fn find(&self, target: LikeTarget, target_id: &str, actor_id: &str) -> Result<Option<LikeRecord>> {
        let record = sqlx::query_as::<_, LikeRecord>(&format!(
            "SELECT id, video_id, comment_id, tweet_id, liked_by, created_at, updated_at \
             FROM likes WHERE {} = ? AND liked_by = ?",
            target.column()
        ))
        .bind(target_id)
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert a like if the target still exists and the actor has not liked
    /// it yet.
    pub async fn insert(&self, target: LikeTarget, target_id: &str, actor_id: &str) -> Result<LikeInsert> {
        let now = now_iso8601();
        let result = sqlx::query(&format!(
            "INSERT INTO likes (id, {}, liked_by, created_at, updated_at) \
             SELECT ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM {} WHERE id = ?) \
             ON CONFLICT DO NOTHING",
            target.column(),
            target.table()
        ))
        .bind(new_id())
        .bind(target_id)
        .bind(actor_id)
        .bind(&now)
        .bind(&now)
        .bind(target_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(LikeInsert::Inserted);
        }

        let exists: i64 = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = ?)",
            target.table()
        ))
        .bind(target_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if exists != 0 {
            LikeInsert::AlreadyLiked
        } else {
            LikeInsert::TargetMissing
        })
    }

    /// Remove the actor's like on a target. Returns false if there was none.
    pub async fn delete(&self, target: LikeTarget, target_id: &str, actor_id: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM likes WHERE {} = ? AND liked_by = ?",
            target.column()
        ))
        .bind(target_id)
        .bind(actor_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of likes on a target
    pub async fn count_for(&self, target: LikeTarget, target_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM likes WHERE {} = ?",
            target.column()
        ))
        .bind(target_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
