// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account session routes: register, login, refresh, logout, userinfo.
//!
//! Native clients carry the refresh token in the body or the
//! `X-Refresh-Token` header; browser clients get an HttpOnly cookie.
//! All three are accepted, in that order.

use super::json_body;
use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::services::IssuedTokens;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub const REFRESH_COOKIE: &str = "refreshToken";
pub const REFRESH_HEADER: &str = "x-refresh-token";
const REFRESH_COOKIE_PATH: &str = "/api/auth";

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/userinfo", get(userinfo))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

impl RegisterRequest {
    /// Strip surrounding whitespace so validation sees the stored values.
    fn trimmed(self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    message: &'static str,
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// POST /register
async fn register(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = json_body(payload)?.trimmed();
    req.validate()?;

    let user = state
        .sessions
        .register(&req.username, &req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "User registered successfully",
            "user": user,
        })),
    ))
}

/// POST /login
async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = json_body(payload)?;
    req.validate().map_err(|_| AppError::InvalidCredentials)?;

    let tokens = state.sessions.login(&req.email, &req.password).await?;
    let jar = jar.add(refresh_cookie(&state, &tokens.refresh_token));

    Ok((jar, Json(token_response("Login successful", tokens))))
}

/// POST /refresh
async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(presented) = presented_refresh_token(&body, &headers, &jar) else {
        return (jar.remove(removal_cookie()), AppError::RefreshTokenMissing).into_response();
    };

    match state.sessions.refresh(&presented).await {
        Ok(tokens) => {
            let jar = jar.add(refresh_cookie(&state, &tokens.refresh_token));
            (jar, Json(token_response("Token refreshed", tokens))).into_response()
        }
        Err(e) => (jar.remove(removal_cookie()), e).into_response(),
    }
}

/// POST /logout
///
/// Always succeeds; a missing or unknown token just means there is nothing
/// to clear.
async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let presented = presented_refresh_token(&body, &headers, &jar);
    state.sessions.logout(presented.as_deref()).await?;

    Ok((
        jar.remove(removal_cookie()),
        Json(MessageResponse {
            message: "Logged out successfully",
        }),
    ))
}

/// GET /userinfo
async fn userinfo(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse> {
    let user = state.sessions.user_info(auth.user_id).await?;
    Ok(Json(serde_json::json!({ "user": user })))
}

/// Body `refreshToken`, then the `X-Refresh-Token` header, then the cookie.
fn presented_refresh_token(body: &[u8], headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    let from_body = serde_json::from_slice::<RefreshRequest>(body)
        .ok()
        .and_then(|r| r.refresh_token)
        .filter(|t| !t.is_empty());
    let from_header = || {
        headers
            .get(REFRESH_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };
    let from_cookie = || {
        jar.get(REFRESH_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|t| !t.is_empty())
    };

    from_body.or_else(from_header).or_else(from_cookie)
}

fn token_response(message: &'static str, tokens: IssuedTokens) -> TokenResponse {
    TokenResponse {
        message,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
    }
}

fn refresh_cookie(state: &AppState, token: &str) -> Cookie<'static> {
    let max_age = time::Duration::seconds(state.sessions.refresh_ttl().num_seconds());

    Cookie::build((REFRESH_COOKIE, token.to_string()))
        .http_only(true)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .max_age(max_age)
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, ""))
        .path(REFRESH_COOKIE_PATH)
        .build()
}
