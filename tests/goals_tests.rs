// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::{Method, StatusCode};
use serde_json::json;

mod common;
use common::{create_test_app, request, send, signed_in_user};

#[tokio::test]
async fn test_goals_default_to_zero() {
    let app = create_test_app();
    let session = signed_in_user(&app, "alice").await;

    let response = send(
        &app,
        request(Method::GET, "/api/goals", None, Some(&session.access_token)),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body,
        json!({ "daily_steps_goal": 0, "sleep_goal_minutes": 0, "active_minutes_goal": 0 })
    );
}

#[tokio::test]
async fn test_set_and_read_goals() {
    let app = create_test_app();
    let session = signed_in_user(&app, "bob").await;

    let response = send(
        &app,
        request(
            Method::POST,
            "/api/goals",
            Some(json!({ "daily_steps_goal": 8000, "sleep_goal_minutes": 480 })),
            Some(&session.access_token),
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["goals"]["daily_steps_goal"], 8000);
    assert_eq!(response.body["goals"]["active_minutes_goal"], 0);

    let response = send(
        &app,
        request(Method::GET, "/api/goals", None, Some(&session.access_token)),
    )
    .await;
    assert_eq!(response.body["daily_steps_goal"], 8000);
    assert_eq!(response.body["sleep_goal_minutes"], 480);
}

#[tokio::test]
async fn test_goals_are_per_user() {
    let app = create_test_app();
    let alice = signed_in_user(&app, "carol").await;
    let bob = signed_in_user(&app, "dave").await;

    send(
        &app,
        request(
            Method::POST,
            "/api/goals",
            Some(json!({ "daily_steps_goal": 12000 })),
            Some(&alice.access_token),
        ),
    )
    .await;

    let response = send(
        &app,
        request(Method::GET, "/api/goals", None, Some(&bob.access_token)),
    )
    .await;
    assert_eq!(response.body["daily_steps_goal"], 0);
}

#[tokio::test]
async fn test_negative_goal_rejected() {
    let app = create_test_app();
    let session = signed_in_user(&app, "erin").await;

    let response = send(
        &app,
        request(
            Method::POST,
            "/api/goals",
            Some(json!({ "daily_steps_goal": -1 })),
            Some(&session.access_token),
        ),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.code(), "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_malformed_goals_body() {
    let app = create_test_app();
    let session = signed_in_user(&app, "frank").await;

    let response = send(
        &app,
        request(
            Method::POST,
            "/api/goals",
            Some(json!({ "daily_steps_goal": "lots" })),
            Some(&session.access_token),
        ),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.code(), "BAD_REQUEST");
}

#[tokio::test]
async fn test_goals_require_auth() {
    let app = create_test_app();

    let response = send(&app, request(Method::GET, "/api/goals", None, None)).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}
