// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use mhearts_api::error::{AppError, DuplicateField};

async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_token_errors_are_distinct_unauthorized() {
    let errors = [
        AppError::InvalidTokenFormat,
        AppError::InvalidToken,
        AppError::TokenExpired,
        AppError::TokenVerificationFailed,
        AppError::RefreshTokenMissing,
        AppError::InvalidRefreshToken,
        AppError::RefreshTokenExpired,
    ];

    let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
    assert!(errors.iter().all(|e| e.status() == StatusCode::UNAUTHORIZED));

    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), errors.len());
}

#[test]
fn test_provider_error_statuses() {
    assert_eq!(
        AppError::ProviderNotConnected("Fitbit".into()).status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        AppError::ProviderReconnectRequired("Fitbit".into()).status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        AppError::ProviderForbidden("Fitbit".into()).status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        AppError::ProviderUnavailable {
            provider: "Omron".into(),
            reason: "HTTP 502".into()
        }
        .status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn test_duplicate_bodies() {
    let (status, body) = body_of(AppError::DuplicateKey(DuplicateField::Email)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_EMAIL");
    assert_eq!(body["message"], "Email already registered.");

    let (_, body) = body_of(AppError::DuplicateKey(DuplicateField::Username)).await;
    assert_eq!(body["code"], "DUPLICATE_USERNAME");
    assert_eq!(body["message"], "Username already taken.");
}

#[tokio::test]
async fn test_internal_details_not_leaked() {
    let (status, body) = body_of(AppError::Database("grpc: deadline exceeded".into())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body["message"].as_str().unwrap().contains("grpc"));

    let (_, body) = body_of(AppError::ProviderUnavailable {
        provider: "Fitbit".into(),
        reason: "secret upstream detail".into(),
    })
    .await;
    assert_eq!(body["code"], "PROVIDER_UNAVAILABLE");
    assert!(!body["message"].as_str().unwrap().contains("secret"));
}
