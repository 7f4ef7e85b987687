// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! Every error body has the shape `{"code": "...", "message": "..."}` where
//! `code` is stable and machine-readable. Clients key off the code, e.g. to
//! choose between a silent refresh (`TOKEN_EXPIRED`) and a forced re-login.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Which unique user field collided on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    Email,
    Username,
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Malformed authorization header")]
    InvalidTokenFormat,

    #[error("Invalid access token")]
    InvalidToken,

    #[error("Access token expired")]
    TokenExpired,

    #[error("Access token verification failed")]
    TokenVerificationFailed,

    #[error("Refresh token missing")]
    RefreshTokenMissing,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Duplicate key: {0:?}")]
    DuplicateKey(DuplicateField),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authorization code missing")]
    MissingCode,

    #[error("Unknown or already used OAuth state")]
    InvalidState,

    #[error("PKCE verifier missing")]
    MissingVerifier,

    #[error("{0} is not connected")]
    ProviderNotConnected(String),

    #[error("{0} authorization revoked or expired")]
    ProviderReconnectRequired(String),

    #[error("{0} denied access")]
    ProviderForbidden(String),

    #[error("{provider} request failed: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::InvalidTokenFormat => "INVALID_TOKEN_FORMAT",
            AppError::InvalidToken => "INVALID_TOKEN",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenVerificationFailed => "TOKEN_VERIFICATION_FAILED",
            AppError::RefreshTokenMissing => "REFRESH_TOKEN_MISSING",
            AppError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AppError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            AppError::DuplicateKey(DuplicateField::Email) => "DUPLICATE_EMAIL",
            AppError::DuplicateKey(DuplicateField::Username) => "DUPLICATE_USERNAME",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::MissingCode => "MISSING_CODE",
            AppError::InvalidState => "INVALID_STATE",
            AppError::MissingVerifier => "MISSING_VERIFIER",
            AppError::ProviderNotConnected(_) => "PROVIDER_NOT_CONNECTED",
            AppError::ProviderReconnectRequired(_) => "RECONNECT_REQUIRED",
            AppError::ProviderForbidden(_) => "INSUFFICIENT_SCOPE",
            AppError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::BadRequest(_)
            | AppError::InvalidCredentials
            | AppError::MissingCode
            | AppError::InvalidState
            | AppError::MissingVerifier
            | AppError::ProviderNotConnected(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTokenFormat
            | AppError::InvalidToken
            | AppError::TokenExpired
            | AppError::TokenVerificationFailed
            | AppError::RefreshTokenMissing
            | AppError::InvalidRefreshToken
            | AppError::RefreshTokenExpired
            | AppError::ProviderReconnectRequired(_) => StatusCode::UNAUTHORIZED,
            AppError::ProviderForbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateKey(_) => StatusCode::CONFLICT,
            AppError::ProviderUnavailable { .. }
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Server-side details stay in the logs.
    fn message(&self) -> String {
        match self {
            AppError::DuplicateKey(DuplicateField::Email) => "Email already registered.".into(),
            AppError::DuplicateKey(DuplicateField::Username) => "Username already taken.".into(),
            AppError::ProviderReconnectRequired(provider) => {
                format!("{} authorization expired, please reconnect", provider)
            }
            AppError::ProviderUnavailable { provider, .. } => {
                format!("{} is unavailable, please retry later", provider)
            }
            AppError::Database(_) => "A storage error occurred".into(),
            AppError::Internal(_) => "An internal error occurred".into(),
            other => other.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<&str> = field_errors.keys().map(|k| k.as_ref()).collect();
        fields.sort_unstable();
        AppError::Validation(format!("invalid fields: {}", fields.join(", ")))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(msg) => tracing::error!(error = %msg, "Database error"),
            AppError::Internal(err) => tracing::error!(error = %err, "Internal server error"),
            AppError::ProviderUnavailable { provider, reason } => {
                tracing::warn!(provider = %provider, reason = %reason, "Provider request failed")
            }
            _ => {}
        }

        let body = ErrorResponse {
            code: self.code(),
            message: self.message(),
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
