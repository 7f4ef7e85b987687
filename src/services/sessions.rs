// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application sessions: registration, login, refresh rotation and logout.
//!
//! Access tokens are HS256 JWTs carrying only the user id. Refresh tokens
//! are opaque (see [`super::tokens`]) and each user has at most one active
//! refresh session. Rotation is a single conditional store update, so a
//! refresh token can be redeemed at most once.

use super::tokens;
use crate::config::Config;
use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{RefreshSession, UserRecord, UserResponse};
use crate::time_utils::Clock;
use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Token pair handed to the client after login or refresh.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl_days: i64,
}

impl SessionService {
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            encoding_key: EncodingKey::from_secret(&config.jwt_signing_key),
            decoding_key: DecodingKey::from_secret(&config.jwt_signing_key),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl_days: config.refresh_token_ttl_days,
        }
    }

    /// Refresh token lifetime, for cookie `Max-Age`.
    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days)
    }

    // ─── Registration / Login ────────────────────────────────────

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserResponse, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("invalid fields: username".to_string()));
        }

        let password = password.to_string();
        let password_hash = blocking(move || tokens::hash_password(&password)).await??;

        let user = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.trim().to_string(),
            password_hash,
            created_at: self.clock.now(),
        };

        self.store.create_user(&user).await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(UserResponse::from(&user))
    }

    /// Check credentials and start a new session, replacing any previous one.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedTokens, AppError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            tracing::info!("Login for unknown email");
            return Err(AppError::InvalidCredentials);
        };

        let password = password.to_string();
        let stored_hash = user.password_hash.clone();
        if !blocking(move || tokens::verify_password(&password, &stored_hash)).await? {
            tracing::info!(user_id = %user.id, "Login with wrong password");
            return Err(AppError::InvalidCredentials);
        }

        let (refresh_token, session) = self.new_session(user.id).await?;
        self.store.put_session(&session).await?;

        tracing::info!(user_id = %user.id, "User logged in");
        self.issue(user.id, refresh_token)
    }

    // ─── Refresh / Logout ────────────────────────────────────────

    /// Redeem a refresh token for a new access token and a rotated refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, AppError> {
        let current = self
            .load_verified_session(refresh_token)
            .await?
            .ok_or(AppError::InvalidRefreshToken)?;

        if tokens::is_refresh_token_expired(self.clock.now(), current.expires_at) {
            self.store
                .clear_session(current.user_id, &current.token_hash)
                .await?;
            tracing::info!(user_id = %current.user_id, "Expired refresh token cleared");
            return Err(AppError::RefreshTokenExpired);
        }

        let (next_token, next) = self.new_session(current.user_id).await?;
        let rotated = self
            .store
            .rotate_session(current.user_id, &current.token_hash, &next)
            .await?;

        if !rotated {
            tracing::warn!(user_id = %current.user_id, "Refresh token already rotated");
            return Err(AppError::InvalidRefreshToken);
        }

        tracing::debug!(user_id = %current.user_id, "Refresh token rotated");
        self.issue(current.user_id, next_token)
    }

    /// End the session owning `refresh_token`. Unknown or missing tokens are
    /// not an error.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), AppError> {
        let Some(token) = refresh_token else {
            return Ok(());
        };

        if let Some(session) = self.load_verified_session(token).await? {
            if self
                .store
                .clear_session(session.user_id, &session.token_hash)
                .await?
            {
                tracing::info!(user_id = %session.user_id, "User logged out");
            }
        }
        Ok(())
    }

    /// Look up the session by selector and check the token against its hash.
    async fn load_verified_session(
        &self,
        refresh_token: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        let Some(selector) = tokens::selector_of(refresh_token) else {
            return Ok(None);
        };
        let Some(session) = self.store.find_session_by_selector(selector).await? else {
            return Ok(None);
        };

        let token = refresh_token.to_string();
        let hash = session.token_hash.clone();
        let matches = blocking(move || tokens::verify_refresh_token(&token, &hash)).await?;

        Ok(matches.then_some(session))
    }

    async fn new_session(&self, user_id: Uuid) -> Result<(String, RefreshSession), AppError> {
        let token = tokens::generate_refresh_token()?;
        let selector = tokens::selector_of(&token)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Generated malformed token")))?
            .to_string();

        let to_hash = token.clone();
        let token_hash = blocking(move || tokens::hash_refresh_token(&to_hash)).await??;

        let session = RefreshSession {
            user_id,
            selector,
            token_hash,
            expires_at: tokens::refresh_token_expiration(self.clock.now(), self.refresh_ttl_days),
        };
        Ok((token, session))
    }

    fn issue(&self, user_id: Uuid, refresh_token: String) -> Result<IssuedTokens, AppError> {
        Ok(IssuedTokens {
            user_id,
            access_token: self.issue_access_token(user_id)?,
            refresh_token,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    // ─── Access Tokens ───────────────────────────────────────────

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, AppError> {
        let now = self.clock.now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.access_ttl.num_seconds(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to sign JWT: {}", e)))
    }

    /// Verify an access token and return the user id it was issued to.
    ///
    /// Expiry is checked against the service clock, not the wall clock.
    pub fn verify_access_token(&self, token: &str) -> Result<Uuid, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::MissingRequiredClaim(_)
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => AppError::InvalidToken,
                _ => {
                    tracing::warn!(error = %e, "JWT verification failed");
                    AppError::TokenVerificationFailed
                }
            }
        })?;

        if self.clock.now().timestamp() >= data.claims.exp {
            return Err(AppError::TokenExpired);
        }

        Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::InvalidToken)
    }

    /// Stored user without credential fields.
    pub async fn user_info(&self, user_id: Uuid) -> Result<UserResponse, AppError> {
        self.store
            .get_user(user_id)
            .await?
            .map(|user| UserResponse::from(&user))
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }
}

/// Run a CPU-heavy closure off the async runtime.
async fn blocking<F, T>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Blocking task failed: {}", e)))
}
