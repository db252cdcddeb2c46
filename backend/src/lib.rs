//! Vidhub backend: accounts, videos, comments, likes and subscriptions over a
//! REST API.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{AuthConfig, PaginationConfig};
use crate::db::Database;
use crate::services::{AuthService, FeedService, SharedStorage, ToggleCoordinator};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub auth: AuthService,
    pub toggles: ToggleCoordinator,
    pub feed: FeedService,
}

impl AppState {
    pub fn new(db: Database, auth: AuthConfig, pagination: PaginationConfig, storage: SharedStorage) -> Self {
        Self {
            auth: AuthService::new(db.clone(), auth),
            toggles: ToggleCoordinator::new(db.clone()),
            feed: FeedService::new(db.clone(), storage, pagination),
            db,
        }
    }
}

/// Full router: health checks plus `/api/v1`, with request tracing
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health::router())
        .nest("/api/v1", api::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for a configured origin, permissive otherwise
pub fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let layer = match origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };
    Ok(layer)
}
