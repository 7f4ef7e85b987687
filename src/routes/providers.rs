// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider OAuth and data routes, mounted under `/api/auth/{provider}`.

use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::models::Provider;
use crate::services::health_data;
use crate::services::oauth::CallbackParams;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// The OAuth callback is driven by the provider, not the client, so it
/// carries no access token.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/{provider}/callback", get(callback))
}

pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{provider}/connect", get(connect))
        .route("/{provider}/refresh", post(refresh))
        .route("/{provider}/disconnect", post(disconnect))
        .route("/{provider}/connection", delete(disconnect))
        .route("/{provider}/status", get(status))
        .route("/{provider}/data", get(data))
        .route("/{provider}/steps", get(steps))
        .route("/{provider}/activitySummary", get(activity_summary))
}

/// 302 to an absolute URL.
fn found(location: String) -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

/// GET /{provider}/connect
async fn connect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse> {
    let service = state.providers.resolve(&provider)?;
    let url = service.connect(auth.user_id).await?;
    Ok(found(url))
}

/// GET /{provider}/callback
async fn callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse> {
    let service = state.providers.resolve(&provider)?;
    let deep_link = service.handle_callback(params).await?;
    Ok(found(deep_link))
}

#[derive(Serialize)]
struct RefreshResponse {
    message: &'static str,
    access_token: String,
}

/// POST /{provider}/refresh
async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<RefreshResponse>> {
    let service = state.providers.resolve(&provider)?;
    let tokens = service.force_refresh(auth.user_id).await?;

    Ok(Json(RefreshResponse {
        message: "Token refreshed",
        access_token: tokens.access_token,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectResponse {
    message: String,
    was_connected: bool,
}

/// POST /{provider}/disconnect, DELETE /{provider}/connection
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<DisconnectResponse>> {
    let service = state.providers.resolve(&provider)?;
    let was_connected = service.disconnect(auth.user_id).await?;

    Ok(Json(DisconnectResponse {
        message: format!("{} disconnected", service.provider().display_name()),
        was_connected,
    }))
}

/// GET /{provider}/status
async fn status(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse> {
    let service = state.providers.resolve(&provider)?;
    Ok(Json(service.status(auth.user_id).await?))
}

// ─── Data ────────────────────────────────────────────────────

/// GET /{provider}/data
async fn data(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>> {
    let service = state.providers.resolve(&provider)?;
    let body = match service.provider() {
        Provider::Fitbit => health_data::fitbit_heart_rate(service, auth.user_id).await?,
        Provider::Omron => health_data::omron_measurements(service, auth.user_id).await?,
    };
    Ok(Json(body))
}

/// GET /{provider}/steps
async fn steps(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>> {
    let service = state.providers.resolve(&provider)?;
    match service.provider() {
        Provider::Fitbit => Ok(Json(
            health_data::fitbit_steps(service, auth.user_id).await?,
        )),
        Provider::Omron => Err(not_offered(&provider, "steps")),
    }
}

/// GET /{provider}/activitySummary
async fn activity_summary(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>> {
    let service = state.providers.resolve(&provider)?;
    match service.provider() {
        Provider::Fitbit => Ok(Json(
            health_data::fitbit_activity_summary(service, auth.user_id).await?,
        )),
        Provider::Omron => Err(not_offered(&provider, "activitySummary")),
    }
}

fn not_offered(provider: &str, resource: &str) -> AppError {
    AppError::NotFound(format!("{}/{}", provider, resource))
}
