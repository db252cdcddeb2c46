//! Authentication service: registration, login and the token lifecycle
//!
//! Provides:
//! - User registration and login
//! - Password hashing with bcrypt (on the blocking pool)
//! - Access/refresh JWT pair issuance and verification
//! - Refresh token rotation with server-side revocation
//!
//! The identity's `refresh_token` column holds the one refresh token that may
//! still be exchanged. Login and rotation overwrite it, logout clears it, and
//! a presented refresh token that differs from it is rejected.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::sqlite_helpers::is_unique_violation;
use crate::db::{AssetRef, CreateUser, Database, PublicUser, UserRecord};
use crate::error::{ApiError, AppResult};

const ACCESS: &str = "access";
const REFRESH: &str = "refresh";

// ============================================================================
// JWT Claims
// ============================================================================

/// Claims structure for access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// User ID (subject)
    pub sub: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub token_type: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    pub iat: i64,
}

/// Claims structure for refresh tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// User ID (subject)
    pub sub: String,
    pub token_type: String,
    /// Unique token ID, so two pairs minted in the same second still differ
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

// ============================================================================
// Auth Types
// ============================================================================

/// Token pair returned after successful authentication
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Login result
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: PublicUser,
    pub tokens: AuthTokens,
}

/// Registration input
#[derive(Debug, Clone, Default)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub avatar: Option<AssetRef>,
    pub cover_image: Option<AssetRef>,
}

// ============================================================================
// Auth Service
// ============================================================================

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db: Database,
    config: AuthConfig,
}

impl AuthService {
    /// Create a new auth service
    pub fn new(db: Database, config: AuthConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ========================================================================
    // User Registration
    // ========================================================================

    /// Register a new user
    pub async fn register(&self, input: RegisterInput) -> AppResult<UserRecord> {
        if [&input.full_name, &input.username, &input.email, &input.password]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(ApiError::validation("All fields are required"));
        }
        let avatar = input
            .avatar
            .ok_or_else(|| ApiError::validation("Avatar file is required"))?;

        let username = input.username.trim().to_lowercase();
        let email = input.email.trim().to_string();

        let users = self.db.users();
        if users
            .get_by_username_or_email(Some(&username), Some(&email))
            .await?
            .is_some()
        {
            return Err(ApiError::conflict("User with email or username already exists"));
        }

        let password_hash = self.hash_password(&input.password).await?;

        let user = users
            .create(CreateUser {
                username,
                email,
                full_name: input.full_name.trim().to_string(),
                password_hash,
                avatar,
                cover_image: input.cover_image,
            })
            .await
            .map_err(|e| {
                // A concurrent registration can win the race past the check above.
                if is_unique_violation(&e) {
                    ApiError::conflict("User with email or username already exists")
                } else {
                    e.into()
                }
            })?;

        info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    // ========================================================================
    // Login / Logout
    // ========================================================================

    /// Login with username or email and password
    pub async fn login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
        password: &str,
    ) -> AppResult<LoginResult> {
        let username = username.map(str::trim).filter(|s| !s.is_empty());
        let email = email.map(str::trim).filter(|s| !s.is_empty());
        if username.is_none() && email.is_none() {
            return Err(ApiError::validation("Username or email is required"));
        }

        let user = self
            .db
            .users()
            .get_by_username_or_email(username, email)
            .await?
            .ok_or_else(|| ApiError::authentication("Invalid user credentials"))?;

        if !self.verify_password(password, &user.password_hash).await? {
            debug!(user_id = %user.id, "Login rejected: wrong password");
            return Err(ApiError::authentication("Invalid user credentials"));
        }

        let tokens = self.generate_tokens(&user)?;
        self.db
            .users()
            .set_refresh_token(&user.id, Some(&tokens.refresh_token))
            .await?;

        info!(user_id = %user.id, "User logged in");
        Ok(LoginResult {
            user: PublicUser::from(&user),
            tokens,
        })
    }

    /// End the session: the stored refresh token can no longer be exchanged
    pub async fn logout(&self, user_id: &str) -> AppResult<()> {
        self.db.users().set_refresh_token(user_id, None).await?;
        info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    // ========================================================================
    // Token Management
    // ========================================================================

    /// Exchange a refresh token for a new pair, invalidating the presented one
    pub async fn refresh(&self, refresh_token: Option<&str>) -> AppResult<AuthTokens> {
        let presented = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::authentication("Unauthorized request"))?;

        let claims = self.decode_refresh_token(presented)?;

        let users = self.db.users();
        let user = users
            .get_by_id(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::authentication("Invalid refresh token"))?;

        if user.refresh_token.as_deref() != Some(presented) {
            warn!(user_id = %user.id, "Rejected superseded refresh token");
            return Err(ApiError::authentication("Refresh token is expired or used"));
        }

        let tokens = self.generate_tokens(&user)?;
        if !users
            .rotate_refresh_token(&user.id, presented, &tokens.refresh_token)
            .await?
        {
            warn!(user_id = %user.id, "Refresh token rotated concurrently");
            return Err(ApiError::authentication("Refresh token is expired or used"));
        }

        debug!(user_id = %user.id, "Refresh token rotated");
        Ok(tokens)
    }

    /// Resolve the identity behind an access token. Checks signature, expiry
    /// and that the identity still exists.
    pub async fn authenticate(&self, access_token: &str) -> AppResult<UserRecord> {
        let claims = self.decode_access_token(access_token)?;
        self.db
            .users()
            .get_by_id(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::authentication("Invalid access token"))
    }

    // ========================================================================
    // Password Management
    // ========================================================================

    /// Change password after verifying the old one. Ends the current session.
    pub async fn change_password(&self, user_id: &str, old_password: &str, new_password: &str) -> AppResult<()> {
        if new_password.trim().is_empty() {
            return Err(ApiError::validation("New password is required"));
        }

        let users = self.db.users();
        let user = users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;

        if !self.verify_password(old_password, &user.password_hash).await? {
            return Err(ApiError::validation("Invalid old password"));
        }

        let new_hash = self.hash_password(new_password).await?;
        users.update_password(user_id, &new_hash).await?;

        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    async fn hash_password(&self, password: &str) -> AppResult<String> {
        let password = password.to_owned();
        let cost = self.config.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| ApiError::internal(format!("Password hashing task failed: {}", e)))?
            .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))
    }

    async fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| ApiError::internal(format!("Password verification task failed: {}", e)))?
            .map_err(|e| ApiError::internal(format!("Failed to verify password: {}", e)))
    }

    /// Sign a new access/refresh pair. Persisting the refresh token is the
    /// caller's job.
    fn generate_tokens(&self, user: &UserRecord) -> AppResult<AuthTokens> {
        let now = Utc::now();
        let access_exp = now + Duration::seconds(self.config.access_token_expiry);
        let refresh_exp = now + Duration::seconds(self.config.refresh_token_expiry);

        let access_claims = AccessTokenClaims {
            sub: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            token_type: ACCESS.to_string(),
            exp: access_exp.timestamp(),
            iat: now.timestamp(),
        };
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &access_claims,
            &EncodingKey::from_secret(self.config.access_token_secret.as_bytes()),
        )
        .map_err(|e| ApiError::internal(format!("Error while generating access token: {}", e)))?;

        let refresh_claims = RefreshTokenClaims {
            sub: user.id.clone(),
            token_type: REFRESH.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: refresh_exp.timestamp(),
            iat: now.timestamp(),
        };
        let refresh_token = encode(
            &Header::new(Algorithm::HS256),
            &refresh_claims,
            &EncodingKey::from_secret(self.config.refresh_token_secret.as_bytes()),
        )
        .map_err(|e| ApiError::internal(format!("Error while generating refresh token: {}", e)))?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
        })
    }

    fn decode_access_token(&self, token: &str) -> AppResult<AccessTokenClaims> {
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.config.access_token_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| ApiError::authentication(format!("Invalid access token: {}", e)))?;

        if token_data.claims.token_type != ACCESS {
            return Err(ApiError::authentication("Invalid token type"));
        }
        Ok(token_data.claims)
    }

    fn decode_refresh_token(&self, token: &str) -> AppResult<RefreshTokenClaims> {
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<RefreshTokenClaims>(
            token,
            &DecodingKey::from_secret(self.config.refresh_token_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| ApiError::authentication(format!("Invalid refresh token: {}", e)))?;

        if token_data.claims.token_type != REFRESH {
            return Err(ApiError::authentication("Invalid token type"));
        }
        Ok(token_data.claims)
    }
}
