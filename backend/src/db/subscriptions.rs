//! Subscriptions repository

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use super::sqlite_helpers::{new_id, now_iso8601};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub id: String,
    #[serde(rename = "subscriber")]
    pub subscriber_id: String,
    #[serde(rename = "channel")]
    pub channel_id: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SubscriptionRepository {
    pool: SqlitePool,
}

impl SubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, subscriber_id: &str, channel_id: &str) -> Result<Option<SubscriptionRecord>> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT id, subscriber_id, channel_id, created_at, updated_at FROM subscriptions \
             WHERE subscriber_id = ? AND channel_id = ?",
        )
        .bind(subscriber_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert a subscription. Returns false if it already exists.
    pub async fn insert(&self, subscriber_id: &str, channel_id: &str) -> Result<bool> {
        let now = now_iso8601();
        let result = sqlx::query(
            "INSERT INTO subscriptions (id, subscriber_id, channel_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(new_id())
        .bind(subscriber_id)
        .bind(channel_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns false if there was nothing to delete.
    pub async fn delete(&self, subscriber_id: &str, channel_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = ? AND channel_id = ?")
            .bind(subscriber_id)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
