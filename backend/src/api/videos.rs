//! Video endpoints

use axum::{
    Router,
    extract::State,
    routing::{get, patch},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::auth::{AuthUser, Viewer};
use super::extract::{PathParam, Payload, QueryParams};
use super::response::ApiResponse;
use crate::AppState;
use crate::db::{AssetRef, Document, VideoRecord};
use crate::error::AppResult;
use crate::services::{Page, PageRequest, PublishVideoInput, UpdateVideoInput, VideoListQuery};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVideosParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishVideoRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub video_file: Option<AssetRef>,
    pub thumbnail: Option<AssetRef>,
    pub duration: Option<f64>,
    pub is_published: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateVideoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<AssetRef>,
}

async fn list_videos(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ListVideosParams>,
) -> AppResult<ApiResponse<Page<Document>>> {
    let page = state
        .feed
        .list_videos(VideoListQuery {
            paging: PageRequest::new(params.page, params.limit),
            query: params.query,
            sort_by: params.sort_by,
            sort_type: params.sort_type,
            user_id: params.user_id,
        })
        .await?;
    Ok(ApiResponse::ok(page, "Videos fetched successfully"))
}

async fn publish_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<PublishVideoRequest>,
) -> AppResult<ApiResponse<VideoRecord>> {
    let video = state
        .feed
        .publish_video(
            &user.id,
            PublishVideoInput {
                title: body.title,
                description: body.description,
                video_file: body.video_file,
                thumbnail: body.thumbnail,
                duration: body.duration,
                is_published: body.is_published,
            },
        )
        .await?;
    Ok(ApiResponse::created(video, "Video published successfully"))
}

async fn get_video(
    State(state): State<AppState>,
    viewer: Viewer,
    PathParam(video_id): PathParam<String>,
) -> AppResult<ApiResponse<Document>> {
    let video = state.feed.video_detail(&video_id, viewer.id()).await?;
    Ok(ApiResponse::ok(video, "Video fetched successfully"))
}

async fn update_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(video_id): PathParam<String>,
    Payload(body): Payload<UpdateVideoRequest>,
) -> AppResult<ApiResponse<VideoRecord>> {
    let video = state
        .feed
        .update_video(
            &user.id,
            &video_id,
            UpdateVideoInput {
                title: body.title,
                description: body.description,
                thumbnail: body.thumbnail,
            },
        )
        .await?;
    Ok(ApiResponse::ok(video, "Video updated successfully"))
}

async fn delete_video(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(video_id): PathParam<String>,
) -> AppResult<ApiResponse<Value>> {
    state.feed.delete_video(&user.id, &video_id).await?;
    Ok(ApiResponse::ok(json!({}), "Video deleted successfully"))
}

async fn toggle_publish(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(video_id): PathParam<String>,
) -> AppResult<ApiResponse<Value>> {
    let is_published = state.feed.toggle_publish(&user.id, &video_id).await?;
    Ok(ApiResponse::ok(
        json!({ "isPublished": is_published }),
        "Publish status toggled successfully",
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_videos).post(publish_video))
        .route("/{videoId}", get(get_video).patch(update_video).delete(delete_video))
        .route("/toggle/publish/{videoId}", patch(toggle_publish))
}
