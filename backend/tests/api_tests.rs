//! Integration tests for the REST API
//!
//! Each test builds the full router over an in-memory database and drives it
//! with `oneshot` requests:
//! - Registration, login cookies and refresh rotation
//! - Viewer-relative flags for anonymous callers
//! - Ownership gates on video mutations
//! - The pagination envelope of the feed

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use vidhub::config::{AuthConfig, PaginationConfig};
use vidhub::db::Database;
use vidhub::services::InMemoryStorage;
use vidhub::{AppState, build_router};

struct TestApp {
    router: Router,
}

struct Reply {
    status: StatusCode,
    cookies: Vec<String>,
    body: Value,
}

impl TestApp {
    async fn new() -> Self {
        let db = Database::connect_in_memory().await.unwrap();
        let state = AppState::new(
            db,
            AuthConfig::for_tests(),
            PaginationConfig::default(),
            Arc::new(InMemoryStorage::default()),
        );
        Self {
            router: build_router(state),
        }
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookies = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply { status, cookies, body }
    }

    /// Register and log in; returns (user id, access token, refresh token)
    async fn sign_up(&self, username: &str) -> (String, String, String) {
        let reply = self
            .send(
                Method::POST,
                "/api/v1/users/register",
                None,
                Some(json!({
                    "fullName": format!("{username} full"),
                    "email": format!("{username}@example.com"),
                    "username": username,
                    "password": "hunter22",
                    "avatar": { "url": "https://cdn.example.com/a.png", "publicId": format!("{username}-avatar") },
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);

        let reply = self
            .send(
                Method::POST,
                "/api/v1/users/login",
                None,
                Some(json!({ "username": username, "password": "hunter22" })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        let data = &reply.body["data"];
        (
            data["user"]["id"].as_str().unwrap().to_string(),
            data["accessToken"].as_str().unwrap().to_string(),
            data["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    async fn publish(&self, token: &str, title: &str) -> String {
        let reply = self
            .send(
                Method::POST,
                "/api/v1/videos",
                Some(token),
                Some(json!({
                    "title": title,
                    "description": "a video",
                    "videoFile": { "url": "https://cdn.example.com/v.mp4", "publicId": format!("{title}-file") },
                    "thumbnail": { "url": "https://cdn.example.com/t.png", "publicId": format!("{title}-thumb") },
                    "duration": 42.0,
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        reply.body["data"]["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new().await;
    let reply = app.send(Method::GET, "/healthz", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], json!("healthy"));

    let reply = app.send(Method::GET, "/readyz", None, None).await;
    assert_eq!(reply.body, json!({ "ready": true, "database": true }));
}

#[tokio::test]
async fn test_login_sets_http_only_cookies() {
    let app = TestApp::new().await;
    app.sign_up("alice").await;

    let reply = app
        .send(
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "email": "alice@example.com", "password": "hunter22" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["success"], json!(true));
    assert_eq!(reply.body["statusCode"], json!(200));
    assert!(reply.body["data"]["user"].get("passwordHash").is_none());
    assert!(reply.body["data"]["user"].get("refreshToken").is_none());

    for name in ["accessToken=", "refreshToken="] {
        let cookie = reply.cookies.iter().find(|c| c.starts_with(name)).unwrap();
        assert!(cookie.contains("HttpOnly"), "{cookie}");
    }
}

#[tokio::test]
async fn test_wrong_password_is_unauthenticated() {
    let app = TestApp::new().await;
    app.sign_up("alice").await;

    let reply = app
        .send(
            Method::POST,
            "/api/v1/users/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["success"], json!(false));
    assert_eq!(reply.body["data"], Value::Null);
    assert!(reply.cookies.is_empty());
}

#[tokio::test]
async fn test_refresh_token_replay_is_rejected() {
    let app = TestApp::new().await;
    let (_, _, refresh) = app.sign_up("alice").await;

    let first = app
        .send(
            Method::POST,
            "/api/v1/users/refresh-token",
            None,
            Some(json!({ "refreshToken": refresh })),
        )
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.cookies.len(), 2);

    let replay = app
        .send(
            Method::POST,
            "/api/v1/users/refresh-token",
            None,
            Some(json!({ "refreshToken": refresh })),
        )
        .await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let app = TestApp::new().await;
    let reply = app.send(Method::GET, "/api/v1/users/current-user", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = app
        .send(Method::GET, "/api/v1/users/current-user", Some("garbage"), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_anonymous_channel_profile_is_never_subscribed() {
    let app = TestApp::new().await;
    let (alice_id, _, _) = app.sign_up("alice").await;
    let (_, bob_token, _) = app.sign_up("bob").await;

    let reply = app
        .send(
            Method::POST,
            &format!("/api/v1/subscriptions/c/{alice_id}"),
            Some(&bob_token),
            None,
        )
        .await;
    assert_eq!(reply.body["data"], json!({ "subscribed": true }));

    let anon = app.send(Method::GET, "/api/v1/users/c/alice", None, None).await;
    assert_eq!(anon.status, StatusCode::OK);
    assert_eq!(anon.body["data"]["subscribersCount"], json!(1));
    assert_eq!(anon.body["data"]["isSubscribed"], json!(false));

    let as_bob = app
        .send(Method::GET, "/api/v1/users/c/alice", Some(&bob_token), None)
        .await;
    assert_eq!(as_bob.body["data"]["isSubscribed"], json!(true));
}

#[tokio::test]
async fn test_video_ownership_gate() {
    let app = TestApp::new().await;
    let (_, alice_token, _) = app.sign_up("alice").await;
    let (_, bob_token, _) = app.sign_up("bob").await;
    let video_id = app.publish(&alice_token, "clip").await;

    let uri = format!("/api/v1/videos/{video_id}");
    let patch_body = json!({ "title": "mine now" });

    let reply = app
        .send(Method::PATCH, &uri, Some(&bob_token), Some(patch_body.clone()))
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    let reply = app
        .send(
            Method::PATCH,
            &format!("/api/v1/videos/toggle/publish/{video_id}"),
            Some(&bob_token),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    let reply = app.send(Method::DELETE, &uri, Some(&bob_token), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = app
        .send(Method::PATCH, &uri, Some(&alice_token), Some(patch_body))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["title"], json!("mine now"));

    let reply = app.send(Method::DELETE, &uri, Some(&alice_token), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let reply = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_feed_pagination_envelope() {
    let app = TestApp::new().await;
    let (_, token, _) = app.sign_up("alice").await;
    for i in 0..25 {
        app.publish(&token, &format!("video-{i:02}")).await;
    }

    let reply = app
        .send(Method::GET, "/api/v1/videos?page=3&limit=10", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let data = &reply.body["data"];
    assert_eq!(data["docs"].as_array().unwrap().len(), 5);
    assert_eq!(data["totalDocs"], json!(25));
    assert_eq!(data["totalPages"], json!(3));
    assert_eq!(data["page"], json!(3));
    assert_eq!(data["hasNextPage"], json!(false));
    assert_eq!(data["prevPage"], json!(2));

    let sorted = app
        .send(Method::GET, "/api/v1/videos?sortBy=title&sortType=asc&limit=1", None, None)
        .await;
    assert_eq!(sorted.body["data"]["docs"][0]["title"], json!("video-00"));

    let bad = app
        .send(Method::GET, "/api/v1/videos?sortBy=password", None, None)
        .await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);

    let bad_page = app.send(Method::GET, "/api/v1/videos?page=abc", None, None).await;
    assert_eq!(bad_page.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_page.body["success"], json!(false));
}

#[tokio::test]
async fn test_like_toggle_round_trip() {
    let app = TestApp::new().await;
    let (_, alice_token, _) = app.sign_up("alice").await;
    let (_, bob_token, _) = app.sign_up("bob").await;
    let video_id = app.publish(&alice_token, "clip").await;
    let uri = format!("/api/v1/likes/toggle/v/{video_id}");

    let liked = app.send(Method::POST, &uri, Some(&bob_token), None).await;
    assert_eq!(liked.body["data"], json!({ "isLiked": true }));

    let liked_videos = app
        .send(Method::GET, "/api/v1/likes/videos", Some(&bob_token), None)
        .await;
    assert_eq!(liked_videos.body["data"][0]["video"]["id"], json!(video_id));

    let unliked = app.send(Method::POST, &uri, Some(&bob_token), None).await;
    assert_eq!(unliked.body["data"], json!({ "isLiked": false }));

    let missing = app
        .send(Method::POST, "/api/v1/likes/toggle/v/not-an-id", Some(&bob_token), None)
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_self_subscription_is_rejected() {
    let app = TestApp::new().await;
    let (alice_id, alice_token, _) = app.sign_up("alice").await;

    let reply = app
        .send(
            Method::POST,
            &format!("/api/v1/subscriptions/c/{alice_id}"),
            Some(&alice_token),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["success"], json!(false));
}

#[tokio::test]
async fn test_drafts_are_hidden_from_other_users_likes() {
    let app = TestApp::new().await;
    let (_, alice_token, _) = app.sign_up("alice").await;
    let (_, bob_token, _) = app.sign_up("bob").await;
    let video_id = app.publish(&alice_token, "clip").await;

    let liked = app
        .send(Method::POST, &format!("/api/v1/likes/toggle/v/{video_id}"), Some(&bob_token), None)
        .await;
    assert_eq!(liked.body["data"], json!({ "isLiked": true }));

    let reply = app
        .send(
            Method::PATCH,
            &format!("/api/v1/videos/toggle/publish/{video_id}"),
            Some(&alice_token),
            None,
        )
        .await;
    assert_eq!(reply.body["data"], json!({ "isPublished": false }));

    let liked_videos = app
        .send(Method::GET, "/api/v1/likes/videos", Some(&bob_token), None)
        .await;
    assert_eq!(liked_videos.body["data"], json!([]));

    let unlike = app
        .send(Method::POST, &format!("/api/v1/likes/toggle/v/{video_id}"), Some(&bob_token), None)
        .await;
    assert_eq!(unlike.status, StatusCode::NOT_FOUND);
}
