//! Comment endpoints

use axum::{
    Router,
    extract::State,
    routing::{get, patch},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::auth::{AuthUser, Viewer};
use super::extract::{PageParams, PathParam, Payload, QueryParams};
use super::response::ApiResponse;
use crate::AppState;
use crate::db::{CommentRecord, Document};
use crate::error::AppResult;
use crate::services::Page;

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub content: String,
}

async fn list_comments(
    State(state): State<AppState>,
    viewer: Viewer,
    PathParam(video_id): PathParam<String>,
    QueryParams(params): QueryParams<PageParams>,
) -> AppResult<ApiResponse<Page<Document>>> {
    let page = state
        .feed
        .list_comments(&video_id, viewer.id(), params.into())
        .await?;
    Ok(ApiResponse::ok(page, "Comments fetched successfully"))
}

async fn add_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(video_id): PathParam<String>,
    Payload(body): Payload<CommentRequest>,
) -> AppResult<ApiResponse<CommentRecord>> {
    let comment = state.feed.add_comment(&user.id, &video_id, &body.content).await?;
    Ok(ApiResponse::created(comment, "Comment added successfully"))
}

async fn update_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(comment_id): PathParam<String>,
    Payload(body): Payload<CommentRequest>,
) -> AppResult<ApiResponse<CommentRecord>> {
    let comment = state
        .feed
        .update_comment(&user.id, &comment_id, &body.content)
        .await?;
    Ok(ApiResponse::ok(comment, "Comment updated successfully"))
}

async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(comment_id): PathParam<String>,
) -> AppResult<ApiResponse<Value>> {
    state.feed.delete_comment(&user.id, &comment_id).await?;
    Ok(ApiResponse::ok(json!({}), "Comment deleted successfully"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{videoId}", get(list_comments).post(add_comment))
        .route("/c/{commentId}", patch(update_comment).delete(delete_comment))
}
