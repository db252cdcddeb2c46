//! API route definitions
//!
//! REST endpoints live under `/api/v1`; health checks are mounted at the root.
//! Every response uses the `{statusCode, data, message, success}` envelope.

pub mod auth;
pub mod comments;
pub mod extract;
pub mod health;
pub mod likes;
pub mod response;
pub mod subscriptions;
pub mod tweets;
pub mod users;
pub mod videos;

use axum::Router;

use crate::AppState;

/// All `/api/v1` routes
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/users", users::router())
        .nest("/videos", videos::router())
        .nest("/comments", comments::router())
        .nest("/likes", likes::router())
        .nest("/subscriptions", subscriptions::router())
        .nest("/tweets", tweets::router())
}
