//! Channel subscription endpoints

use axum::{Router, extract::State, routing::get};
use serde_json::{Value, json};

use super::auth::{AuthUser, Viewer};
use super::extract::{PageParams, PathParam, QueryParams};
use super::response::ApiResponse;
use crate::AppState;
use crate::error::{ApiError, AppResult};
use crate::services::feed::{SubscribedChannels, SubscriberList};

/// Subscribe or unsubscribe
async fn toggle_subscription(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathParam(channel_id): PathParam<String>,
) -> AppResult<ApiResponse<Value>> {
    if user.id == channel_id {
        return Err(ApiError::validation("You cannot subscribe to your own channel"));
    }
    let subscribed = state.toggles.toggle_subscription(&user.id, &channel_id).await?;
    let message = if subscribed {
        "Subscribed successfully"
    } else {
        "Unsubscribed successfully"
    };
    Ok(ApiResponse::ok(json!({ "subscribed": subscribed }), message))
}

/// Subscribers of a channel
async fn channel_subscribers(
    State(state): State<AppState>,
    viewer: Viewer,
    PathParam(channel_id): PathParam<String>,
    QueryParams(params): QueryParams<PageParams>,
) -> AppResult<ApiResponse<SubscriberList>> {
    let list = state
        .feed
        .channel_subscribers(&channel_id, viewer.id(), params.into())
        .await?;
    Ok(ApiResponse::ok(list, "Subscribers fetched successfully"))
}

/// Channels a user is subscribed to
async fn subscribed_channels(
    State(state): State<AppState>,
    PathParam(subscriber_id): PathParam<String>,
    QueryParams(params): QueryParams<PageParams>,
) -> AppResult<ApiResponse<SubscribedChannels>> {
    let channels = state
        .feed
        .subscribed_channels(&subscriber_id, params.into())
        .await?;
    Ok(ApiResponse::ok(channels, "Subscribed channels fetched successfully"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/c/{channelId}", get(channel_subscribers).post(toggle_subscription))
        .route("/u/{subscriberId}", get(subscribed_channels))
}
