// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access-token authentication middleware.

use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

/// Authenticated user extracted from the access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Middleware that requires a valid `Authorization: Bearer <token>` header.
///
/// Malformed headers are `INVALID_TOKEN_FORMAT`; expired tokens are
/// `TOKEN_EXPIRED` so the client knows to refresh instead of logging in.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user_id = state.sessions.verify_access_token(token)?;

    request.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(request).await)
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// Exactly two space-separated parts with the `Bearer` scheme are accepted.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AppError::InvalidTokenFormat)?
        .to_str()
        .map_err(|_| AppError::InvalidTokenFormat)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AppError::InvalidTokenFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc")).unwrap(), "abc");
    }

    #[test]
    fn test_malformed_headers_are_rejected() {
        for value in ["", "Bearer", "Bearer ", "Basic abc", "bearer abc", "Bearer a b"] {
            assert!(
                matches!(
                    extract_bearer_token(&headers(value)),
                    Err(AppError::InvalidTokenFormat)
                ),
                "accepted {:?}",
                value
            );
        }
        assert!(matches!(
            extract_bearer_token(&HeaderMap::new()),
            Err(AppError::InvalidTokenFormat)
        ));
    }
}
