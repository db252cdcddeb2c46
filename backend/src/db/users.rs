//! Users repository: identities, credentials and watch history
//!
//! The `refresh_token` column holds the single active long-lived token for an
//! identity. Only the token lifecycle methods below write it.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

use super::AssetRef;
use super::sqlite_helpers::{from_json, from_json_opt, json_to_vec, new_id, now_iso8601, to_json};

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, avatar, cover_image, \
                            watch_history, refresh_token, created_at, updated_at";

// ============================================================================
// User Records
// ============================================================================

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar: AssetRef,
    pub cover_image: Option<AssetRef>,
    /// Watched video ids, oldest first, no duplicates
    pub watch_history: Vec<String>,
    pub refresh_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl sqlx::FromRow<'_, SqliteRow> for UserRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let avatar: String = row.try_get("avatar")?;
        let cover_image: Option<String> = row.try_get("cover_image")?;
        let watch_history: String = row.try_get("watch_history")?;

        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            password_hash: row.try_get("password_hash")?,
            avatar: from_json(&avatar).map_err(|e| sqlx::Error::Decode(e.into()))?,
            cover_image: from_json_opt(cover_image.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            watch_history: json_to_vec(&watch_history),
            refresh_token: row.try_get("refresh_token")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// The identity as other users and the owner see it: no credentials.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: AssetRef,
    pub cover_image: Option<AssetRef>,
    pub watch_history: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            avatar: user.avatar.clone(),
            cover_image: user.cover_image.clone(),
            watch_history: user.watch_history.clone(),
            created_at: user.created_at.clone(),
            updated_at: user.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    /// Already lower-cased
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar: AssetRef,
    pub cover_image: Option<AssetRef>,
}

// ============================================================================
// Repository
// ============================================================================

pub struct UsersRepository {
    pool: SqlitePool,
}

impl UsersRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user
    pub async fn create(&self, user: CreateUser) -> Result<UserRecord> {
        let id = new_id();
        let now = now_iso8601();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, full_name, password_hash, avatar, cover_image,
                               watch_history, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, '[]', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(to_json(&user.avatar))
        .bind(user.cover_image.as_ref().map(to_json))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to create user"))
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get user by username (stored lower-case)
    pub async fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get user by email (case-insensitive)
    pub async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// First user matching either the username or the email. Absent values
    /// never match.
    pub async fn get_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ? OR email = ? LIMIT 1"
        ))
        .bind(username.map(str::to_lowercase))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    // ========================================================================
    // Long-lived token
    // ========================================================================

    /// Overwrite (or clear, with `None`) the stored long-lived token
    pub async fn set_refresh_token(&self, id: &str, token: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE users SET refresh_token = ?, updated_at = ? WHERE id = ?")
            .bind(token)
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Replace `current` with `next` only if `current` is still the stored
    /// token. Returns false when another request rotated or cleared it first.
    pub async fn rotate_refresh_token(&self, id: &str, current: &str, next: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = ?, updated_at = ? WHERE id = ? AND refresh_token = ?",
        )
        .bind(next)
        .bind(now_iso8601())
        .bind(id)
        .bind(current)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ========================================================================
    // Profile
    // ========================================================================

    /// Store a new password hash and end the current session
    pub async fn update_password(&self, id: &str, password_hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE users SET password_hash = ?, refresh_token = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(password_hash)
        .bind(now_iso8601())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_account(&self, id: &str, full_name: &str, email: &str) -> Result<Option<UserRecord>> {
        sqlx::query("UPDATE users SET full_name = ?, email = ?, updated_at = ? WHERE id = ?")
            .bind(full_name)
            .bind(email)
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_by_id(id).await
    }

    pub async fn update_avatar(&self, id: &str, avatar: &AssetRef) -> Result<()> {
        sqlx::query("UPDATE users SET avatar = ?, updated_at = ? WHERE id = ?")
            .bind(to_json(avatar))
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn update_cover_image(&self, id: &str, cover_image: &AssetRef) -> Result<()> {
        sqlx::query("UPDATE users SET cover_image = ?, updated_at = ? WHERE id = ?")
            .bind(to_json(cover_image))
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Watch history
    // ========================================================================

    /// Append a video to the watch history unless it is already there.
    /// Returns true when the history changed.
    pub async fn append_watch_history(&self, id: &str, video_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET watch_history = json_insert(watch_history, '$[#]', ?), updated_at = ?
            WHERE id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM json_each(users.watch_history) WHERE json_each.value = ?
              )
            "#,
        )
        .bind(video_id)
        .bind(now_iso8601())
        .bind(id)
        .bind(video_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::sqlite_helpers::is_unique_violation;
    use pretty_assertions::assert_eq;

    fn asset(id: &str) -> AssetRef {
        AssetRef {
            url: format!("https://cdn.example.com/{id}.png"),
            public_id: id.to_string(),
        }
    }

    fn new_user(username: &str, email: &str) -> CreateUser {
        CreateUser {
            username: username.to_string(),
            email: email.to_string(),
            full_name: "Test User".to_string(),
            password_hash: "hash".to_string(),
            avatar: asset("avatar"),
            cover_image: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.users();
        let user = repo.create(new_user("alice", "Alice@Example.com")).await.unwrap();

        assert_eq!(user.avatar, asset("avatar"));
        assert!(user.watch_history.is_empty());
        assert!(user.refresh_token.is_none());

        assert!(repo.get_by_username("ALICE").await.unwrap().is_some());
        assert!(repo.get_by_email("alice@example.com").await.unwrap().is_some());
        assert!(
            repo.get_by_username_or_email(None, Some("alice@example.com"))
                .await
                .unwrap()
                .is_some()
        );
        assert!(repo.get_by_username_or_email(None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_is_unique_violation() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.users();
        repo.create(new_user("alice", "a@example.com")).await.unwrap();
        let err = repo.create(new_user("alice", "b@example.com")).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_rotation_is_compare_and_swap() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.users();
        let user = repo.create(new_user("alice", "a@example.com")).await.unwrap();

        repo.set_refresh_token(&user.id, Some("t1")).await.unwrap();
        assert!(repo.rotate_refresh_token(&user.id, "t1", "t2").await.unwrap());
        assert!(!repo.rotate_refresh_token(&user.id, "t1", "t3").await.unwrap());

        let stored = repo.get_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("t2"));

        repo.update_password(&user.id, "new-hash").await.unwrap();
        let stored = repo.get_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token, None);
        assert_eq!(stored.password_hash, "new-hash");
    }

    #[tokio::test]
    async fn test_watch_history_appends_once_in_order() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.users();
        let user = repo.create(new_user("alice", "a@example.com")).await.unwrap();

        assert!(repo.append_watch_history(&user.id, "v2").await.unwrap());
        assert!(repo.append_watch_history(&user.id, "v1").await.unwrap());
        assert!(!repo.append_watch_history(&user.id, "v2").await.unwrap());

        let stored = repo.get_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.watch_history, vec!["v2".to_string(), "v1".to_string()]);
    }
}
