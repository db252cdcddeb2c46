//! Tweet endpoints

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;

use super::auth::AuthUser;
use super::extract::{PathParam, Payload};
use super::response::ApiResponse;
use crate::AppState;
use crate::db::TweetRecord;
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct TweetRequest {
    #[serde(default)]
    pub content: String,
}

async fn create_tweet(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(body): Payload<TweetRequest>,
) -> AppResult<ApiResponse<TweetRecord>> {
    let tweet = state.feed.create_tweet(&user.id, &body.content).await?;
    Ok(ApiResponse::created(tweet, "Tweet created successfully"))
}

async fn get_tweet(
    State(state): State<AppState>,
    PathParam(tweet_id): PathParam<String>,
) -> AppResult<ApiResponse<TweetRecord>> {
    let tweet = state.feed.get_tweet(&tweet_id).await?;
    Ok(ApiResponse::ok(tweet, "Tweet fetched successfully"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_tweet))
        .route("/{tweetId}", get(get_tweet))
}
