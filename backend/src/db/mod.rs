//! Database connection and operations

pub mod comments;
pub mod likes;
pub mod pipeline;
pub mod schema;
pub mod sqlite_helpers;
pub mod subscriptions;
pub mod tweets;
pub mod users;
pub mod videos;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub use comments::{CommentRecord, CommentRepository};
pub use likes::{LikeInsert, LikeRecord, LikeRepository, LikeTarget};
pub use pipeline::{Aggregation, Collection, Document, Pipeline};
pub use subscriptions::{SubscriptionRecord, SubscriptionRepository};
pub use tweets::{TweetRecord, TweetRepository};
pub use users::{CreateUser, PublicUser, UserRecord, UsersRepository};
pub use videos::{CreateVideo, UpdateVideo, VideoRecord, VideoRepository};

/// Descriptor of a file already uploaded to asset storage, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub url: String,
    pub public_id: String,
}

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Create a new database connection pool, creating the file if needed
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid DATABASE_URL '{}'", url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Private in-memory database with the schema applied.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.sync_schema().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create missing tables and indexes
    pub async fn sync_schema(&self) -> Result<()> {
        schema::sync_schema(&self.pool).await?;
        Ok(())
    }

    /// Cheap round trip used by readiness checks
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Execute a typed pipeline against a collection
    pub async fn aggregate(&self, collection: Collection, pipeline: &Pipeline) -> Result<Aggregation> {
        pipeline::execute(&self.pool, collection, pipeline).await
    }

    /// Get a users repository
    pub fn users(&self) -> UsersRepository {
        UsersRepository::new(self.pool.clone())
    }

    /// Get a videos repository
    pub fn videos(&self) -> VideoRepository {
        VideoRepository::new(self.pool.clone())
    }

    /// Get a comments repository
    pub fn comments(&self) -> CommentRepository {
        CommentRepository::new(self.pool.clone())
    }

    /// Get a likes repository
    pub fn likes(&self) -> LikeRepository {
        LikeRepository::new(self.pool.clone())
    }

    /// Get a subscriptions repository
    pub fn subscriptions(&self) -> SubscriptionRepository {
        SubscriptionRepository::new(self.pool.clone())
    }

    /// Get a tweets repository
    pub fn tweets(&self) -> TweetRepository {
        TweetRepository::new(self.pool.clone())
    }
}
