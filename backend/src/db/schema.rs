//! Idempotent schema creation for the five graph collections plus tweets.
//!
//! Every statement is `IF NOT EXISTS`, so running [`sync_schema`] on every
//! startup is safe.

use sqlx::SqlitePool;
use tracing::{debug, info};

const TABLES: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            full_name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            avatar TEXT NOT NULL,
            cover_image TEXT,
            watch_history TEXT NOT NULL DEFAULT '[]',
            refresh_token TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "videos",
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            video_file TEXT NOT NULL,
            thumbnail TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            duration REAL NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "comments",
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            video_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "likes",
        r#"
        CREATE TABLE IF NOT EXISTS likes (
            id TEXT PRIMARY KEY,
            video_id TEXT,
            comment_id TEXT,
            tweet_id TEXT,
            liked_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK ((video_id IS NOT NULL) + (comment_id IS NOT NULL) + (tweet_id IS NOT NULL) = 1)
        )
        "#,
    ),
    (
        "subscriptions",
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            subscriber_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "tweets",
        r#"
        CREATE TABLE IF NOT EXISTS tweets (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_videos_published ON videos(is_published, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_tweets_owner ON tweets(owner_id)",
    // One like per (actor, target), one subscription per (subscriber, channel).
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_likes_video ON likes(liked_by, video_id) WHERE video_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_likes_comment ON likes(liked_by, comment_id) WHERE comment_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_likes_tweet ON likes(liked_by, tweet_id) WHERE tweet_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_likes_video ON likes(video_id)",
    "CREATE INDEX IF NOT EXISTS idx_likes_comment ON likes(comment_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_subscriptions_pair ON subscriptions(subscriber_id, channel_id)",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel_id)",
];

/// Create all tables and indexes that do not exist yet.
pub async fn sync_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for (name, ddl) in TABLES {
        debug!(table = %name, "Ensuring table");
        sqlx::query(ddl).execute(pool).await?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    info!(tables = TABLES.len(), indexes = INDEXES.len(), "Schema sync complete");
    Ok(())
}
