//! Caller identity extractors and credential cookies
//!
//! The access token is read from the `accessToken` cookie first, then from an
//! `Authorization: Bearer` header for non-browser clients.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use tracing::debug;

use crate::AppState;
use crate::db::UserRecord;
use crate::error::ApiError;
use crate::services::AuthTokens;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Extract bearer token from Authorization header
fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn access_token(parts: &Parts) -> Option<String> {
    CookieJar::from_headers(&parts.headers)
        .get(ACCESS_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| extract_bearer(&parts.headers))
}

/// An authenticated caller. Rejects with 401 when the token is missing or
/// invalid.
pub struct AuthUser(pub UserRecord);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token(parts).ok_or_else(|| ApiError::authentication("Unauthorized request"))?;
        let user = state.auth.authenticate(&token).await?;
        Ok(AuthUser(user))
    }
}

/// The caller if a valid access token was presented, anonymous otherwise.
pub struct Viewer(pub Option<UserRecord>);

impl Viewer {
    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|u| u.id.as_str())
    }
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = access_token(parts) else {
            return Ok(Viewer(None));
        };
        match state.auth.authenticate(&token).await {
            Ok(user) => Ok(Viewer(Some(user))),
            Err(ApiError::Authentication(reason)) => {
                debug!(reason = %reason, "Ignoring invalid access token on public route");
                Ok(Viewer(None))
            }
            Err(e) => Err(e),
        }
    }
}

/// Refresh token from the cookie, if present
pub fn refresh_cookie(jar: &CookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

fn credential_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Set both credential cookies
pub fn with_credentials(jar: CookieJar, tokens: &AuthTokens, secure: bool) -> CookieJar {
    jar.add(credential_cookie(ACCESS_COOKIE, tokens.access_token.clone(), secure))
        .add(credential_cookie(REFRESH_COOKIE, tokens.refresh_token.clone(), secure))
}

/// Expire both credential cookies
pub fn without_credentials(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}
