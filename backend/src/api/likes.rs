//! Like toggles and liked-video listing

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};

use super::auth::AuthUser;
use super::extract::PathParam;
use super::response::ApiResponse;
use crate::AppState;
use crate::db::{Document, LikeTarget};
use crate::error::AppResult;

async fn toggle(state: &AppState, actor_id: &str, target: LikeTarget, target_id: &str) -> AppResult<ApiResponse<Value>> {
    let is_liked = state.toggles.toggle_like(actor_id, target, target_id).await?;
    let message = if is_liked { "Liked successfully" } else { "Unliked successfully" };
    Ok(ApiResponse::ok(json!({ "isLiked": is_liked }), message))
}

async fn toggle_video_like(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(video_id): PathParam<String>,
) -> AppResult<ApiResponse<Value>> {
    toggle(&state, &user.id, LikeTarget::Video, &video_id).await
}

async fn toggle_comment_like(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(comment_id): PathParam<String>,
) -> AppResult<ApiResponse<Value>> {
    toggle(&state, &user.id, LikeTarget::Comment, &comment_id).await
}

async fn toggle_tweet_like(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(tweet_id): PathParam<String>,
) -> AppResult<ApiResponse<Value>> {
    toggle(&state, &user.id, LikeTarget::Tweet, &tweet_id).await
}

async fn liked_videos(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<ApiResponse<Vec<Document>>> {
    let videos = state.feed.liked_videos(&user.id).await?;
    Ok(ApiResponse::ok(videos, "Liked videos fetched successfully"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/toggle/v/{videoId}", post(toggle_video_like))
        .route("/toggle/c/{commentId}", post(toggle_comment_like))
        .route("/toggle/t/{tweetId}", post(toggle_tweet_like))
        .route("/videos", get(liked_videos))
}
