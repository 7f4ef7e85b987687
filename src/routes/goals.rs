// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily goal routes.

use super::json_body;
use crate::error::Result;
use crate::middleware::AuthUser;
use crate::models::Goals;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/goals", get(get_goals).post(set_goals))
}

#[derive(Serialize)]
struct GoalsSaved {
    message: &'static str,
    goals: Goals,
}

/// GET /api/goals
async fn get_goals(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Goals>> {
    let goals = state.store.get_goals(auth.user_id).await?.unwrap_or_default();
    Ok(Json(goals))
}

/// POST /api/goals
async fn set_goals(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    payload: std::result::Result<Json<Goals>, JsonRejection>,
) -> Result<Json<GoalsSaved>> {
    let goals = json_body(payload)?;
    goals.validate()?;

    state.store.set_goals(auth.user_id, &goals).await?;
    tracing::debug!(user_id = %auth.user_id, "Goals updated");

    Ok(Json(GoalsSaved {
        message: "Goals saved",
        goals,
    }))
}
