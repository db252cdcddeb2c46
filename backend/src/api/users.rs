//! Account and channel endpoints

use axum::{
    Router,
    body::Bytes,
    extract::State,
    routing::{get, patch, post},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::auth::{AuthUser, Viewer, refresh_cookie, with_credentials, without_credentials};
use super::extract::{PathParam, Payload};
use super::response::ApiResponse;
use crate::AppState;
use crate::db::{AssetRef, Document, PublicUser};
use crate::error::{ApiError, AppResult};
use crate::services::{AuthTokens, RegisterInput};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub avatar: Option<AssetRef>,
    pub cover_image: Option<AssetRef>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct AvatarRequest {
    pub avatar: Option<AssetRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverImageRequest {
    pub cover_image: Option<AssetRef>,
}

async fn register(
    State(state): State<AppState>,
    Payload(body): Payload<RegisterRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = state
        .auth
        .register(RegisterInput {
            username: body.username,
            email: body.email,
            full_name: body.full_name,
            password: body.password,
            avatar: body.avatar,
            cover_image: body.cover_image,
        })
        .await?;
    Ok(ApiResponse::created(PublicUser::from(&user), "User registered successfully"))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Payload(body): Payload<LoginRequest>,
) -> AppResult<(CookieJar, ApiResponse<LoginResponse>)> {
    let result = state
        .auth
        .login(body.username.as_deref(), body.email.as_deref(), &body.password)
        .await?;

    let jar = with_credentials(jar, &result.tokens, state.auth.config().cookie_secure);
    let data = LoginResponse {
        user: result.user,
        access_token: result.tokens.access_token,
        refresh_token: result.tokens.refresh_token,
    };
    Ok((jar, ApiResponse::ok(data, "User logged in successfully")))
}

async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, ApiResponse<Value>)> {
    state.auth.logout(&user.id).await?;
    Ok((without_credentials(jar), ApiResponse::ok(json!({}), "User logged out")))
}

/// Accepts the refresh token from the cookie or from a JSON body.
async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, ApiResponse<AuthTokens>)> {
    let presented = refresh_cookie(&jar).or_else(|| {
        serde_json::from_slice::<RefreshRequest>(&body)
            .ok()
            .and_then(|b| b.refresh_token)
    });

    let tokens = state.auth.refresh(presented.as_deref()).await?;
    let jar = with_credentials(jar, &tokens, state.auth.config().cookie_secure);
    Ok((jar, ApiResponse::ok(tokens, "Access token refreshed")))
}

async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<ChangePasswordRequest>,
) -> AppResult<ApiResponse<Value>> {
    state
        .auth
        .change_password(&user.id, &body.old_password, &body.new_password)
        .await?;
    Ok(ApiResponse::ok(json!({}), "Password changed successfully"))
}

async fn current_user(AuthUser(user): AuthUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(PublicUser::from(&user), "Current user fetched successfully")
}

async fn update_account(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<UpdateAccountRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let updated = state
        .feed
        .update_account(&user.id, &body.full_name, &body.email)
        .await?;
    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<AvatarRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let avatar = body
        .avatar
        .ok_or_else(|| ApiError::validation("Avatar file is missing"))?;
    let updated = state.feed.update_avatar(&user.id, avatar).await?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<CoverImageRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let cover_image = body
        .cover_image
        .ok_or_else(|| ApiError::validation("Cover image file is missing"))?;
    let updated = state.feed.update_cover_image(&user.id, cover_image).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

async fn channel_profile(
    State(state): State<AppState>,
    viewer: Viewer,
    PathParam(username): PathParam<String>,
) -> AppResult<ApiResponse<Document>> {
    let channel = state.feed.channel_profile(&username, viewer.id()).await?;
    Ok(ApiResponse::ok(channel, "User channel fetched successfully"))
}

async fn watch_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<ApiResponse<Vec<Value>>> {
    let history = state.feed.watch_history(&user.id).await?;
    Ok(ApiResponse::ok(history, "Watch history fetched successfully"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/change-password", post(change_password))
        .route("/current-user", get(current_user))
        .route("/update-account", patch(update_account))
        .route("/avatar", patch(update_avatar))
        .route("/cover-image", patch(update_cover_image))
        .route("/c/{username}", get(channel_profile))
        .route("/history", get(watch_history))
}
