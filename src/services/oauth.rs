// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth2 Authorization Code + PKCE broker for external health providers.
//!
//! Handles:
//! - Building the authorization redirect with a stored verifier and state
//! - The unauthenticated callback, correlated only by `state`
//! - Token refresh when the provider access token has expired
//! - Disconnect and connection status
//!
//! One [`ProviderService`] exists per configured provider; the
//! [`ProviderRegistry`] maps path segments to them.

use super::pkce;
use crate::config::{Config, ProviderConfig};
use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{Provider, ProviderTokens};
use crate::time_utils::{format_utc_rfc3339, Clock};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest token lifetime accepted from a provider (one year).
const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

/// Token endpoint response (authorization_code and refresh_token grants).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

/// HTTP client for one provider's token endpoint and data API.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(http: reqwest::Client, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }

    /// Provider authorization endpoint with the PKCE parameters.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, AppError> {
        let url = reqwest::Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", self.config.scopes.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid authorize URL: {}", e)))?;

        Ok(url.into())
    }

    /// Exchange an authorization code and PKCE verifier for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, AppError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    /// Redeem a provider refresh token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AppError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        if self.config.credentials_in_body {
            form.push(("client_id", self.config.client_id.as_str()));
            form.push(("client_secret", self.config.client_secret.as_str()));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| self.unavailable(format!("Failed to parse token response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        let oauth_error = serde_json::from_str::<OAuthErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_default();

        // A rejected grant means the user has to go through consent again.
        if status == reqwest::StatusCode::UNAUTHORIZED || oauth_error == "invalid_grant" {
            tracing::warn!(
                provider = %self.provider(),
                status = %status,
                error = %oauth_error,
                "Provider rejected grant"
            );
            return Err(AppError::ProviderReconnectRequired(
                self.provider().display_name().to_string(),
            ));
        }

        Err(self.unavailable(format!("Token endpoint HTTP {}: {}", status, oauth_error)))
    }

    /// GET a data API path with a bearer token.
    pub async fn get_json(
        &self,
        access_token: &str,
        path: &str,
    ) -> Result<serde_json::Value, AppError> {
        let response = self
            .http
            .get(self.api_url(path))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.check_response_json(response).await
    }

    /// POST a JSON body to a data API path with a bearer token.
    pub async fn post_json(
        &self,
        access_token: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let response = self
            .http
            .post(self.api_url(path))
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.check_response_json(response).await
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    /// Check response status and parse the JSON body.
    async fn check_response_json(
        &self,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, AppError> {
        let status = response.status();
        let name = self.provider().display_name().to_string();

        match status.as_u16() {
            200..=299 => response
                .json()
                .await
                .map_err(|e| self.unavailable(format!("JSON parse error: {}", e))),
            401 => Err(AppError::ProviderReconnectRequired(name)),
            403 => Err(AppError::ProviderForbidden(name)),
            429 => {
                tracing::warn!(provider = %self.provider(), "Provider rate limit hit (429)");
                Err(self.unavailable("rate limited".to_string()))
            }
            _ => Err(self.unavailable(format!("HTTP {}", status))),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> AppError {
        let reason = if e.is_timeout() {
            "request timed out".to_string()
        } else {
            format!("request failed: {}", e)
        };
        self.unavailable(reason)
    }

    fn unavailable(&self, reason: String) -> AppError {
        AppError::ProviderUnavailable {
            provider: self.provider().display_name().to_string(),
            reason,
        }
    }
}

/// Query parameters the provider sends to the callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Connection summary without token values.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub provider: Provider,
    pub connected: bool,
    pub expires_at: Option<String>,
}

/// Per-user locks serializing provider token refreshes.
pub type RefreshLocks = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

/// OAuth broker and token refresh guard for one provider.
#[derive(Clone)]
pub struct ProviderService {
    client: ProviderClient,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    frontend_url: String,
    refresh_locks: RefreshLocks,
}

impl ProviderService {
    pub fn new(
        client: ProviderClient,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        frontend_url: String,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            frontend_url,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn provider(&self) -> Provider {
        self.client.provider()
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Today's date on the service clock (UTC).
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    // ─── Authorization ───────────────────────────────────────────

    /// Start a connection: persist verifier and state, return the redirect URL.
    ///
    /// The pending authorization is stored before the URL is returned, so a
    /// fast callback always finds it.
    pub async fn connect(&self, user_id: Uuid) -> Result<String, AppError> {
        let verifier = pkce::generate_code_verifier()?;
        let challenge = pkce::code_challenge(&verifier);
        let state = pkce::generate_state()?;

        self.store
            .begin_authorization(user_id, self.provider(), &verifier, &state)
            .await?;

        tracing::info!(user_id = %user_id, provider = %self.provider(), "OAuth connect started");
        self.client.authorization_url(&state, &challenge)
    }

    /// Complete the authorization code flow.
    ///
    /// Returns the deep link to redirect the user agent to. Invalid requests
    /// (missing code, unknown state, missing verifier) are errors instead.
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<String, AppError> {
        let state = params.state.filter(|s| !s.is_empty());

        if let Some(error) = params.error.filter(|e| !e.is_empty()) {
            if let Some(state) = &state {
                self.store
                    .take_pending_authorization(self.provider(), state)
                    .await?;
            }
            tracing::info!(provider = %self.provider(), error = %error, "Authorization denied");
            return Ok(self.failure_link(&error));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(AppError::MissingCode)?;
        let state = state.ok_or(AppError::InvalidState)?;

        // Consumed up front: a replayed state finds nothing.
        let pending = self
            .store
            .take_pending_authorization(self.provider(), &state)
            .await?
            .ok_or_else(|| {
                tracing::warn!(provider = %self.provider(), "Callback with unknown state");
                AppError::InvalidState
            })?;
        let verifier = pending.code_verifier.ok_or(AppError::MissingVerifier)?;

        let exchanged = self
            .client
            .exchange_code(&code, &verifier)
            .await
            .and_then(|response| self.tokens_from_response(response, None));

        match exchanged {
            Ok(tokens) => {
                self.store
                    .store_provider_tokens(pending.user_id, self.provider(), &tokens)
                    .await?;

                tracing::info!(
                    user_id = %pending.user_id,
                    provider = %self.provider(),
                    scope = tokens.scope.as_deref().unwrap_or(""),
                    "Provider connected"
                );
                Ok(self.success_link())
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %pending.user_id,
                    provider = %self.provider(),
                    error = %e,
                    "Code exchange failed"
                );
                let reason = match e {
                    AppError::ProviderReconnectRequired(_) => "authorization_rejected",
                    _ => "token_exchange_failed",
                };
                Ok(self.failure_link(reason))
            }
        }
    }

    fn success_link(&self) -> String {
        format!(
            "{}/dashboard?{}=connected",
            self.frontend_url.trim_end_matches('/'),
            self.provider()
        )
    }

    fn failure_link(&self, details: &str) -> String {
        format!(
            "{}/error?msg={}_failed&details={}",
            self.frontend_url.trim_end_matches('/'),
            self.provider(),
            urlencoding::encode(details)
        )
    }

    // ─── Token Refresh Guard ─────────────────────────────────────

    /// Get a non-expired provider access token, refreshing if needed.
    ///
    /// 1. Load stored tokens (fast path when not expired)
    /// 2. Acquire the per-user refresh lock
    /// 3. Re-read: another task may have refreshed while we waited
    /// 4. Refresh with the provider and persist
    pub async fn ensure_valid_access_token(&self, user_id: Uuid) -> Result<String, AppError> {
        let tokens = self.load_tokens(user_id).await?;
        if !self.is_expired(tokens.expires_at) {
            return Ok(tokens.access_token);
        }

        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let tokens = self.load_tokens(user_id).await?;
        if !self.is_expired(tokens.expires_at) {
            return Ok(tokens.access_token);
        }

        tracing::info!(user_id = %user_id, provider = %self.provider(), "Provider token expired, refreshing");
        let refreshed = self.refresh_locked(user_id, tokens).await?;
        Ok(refreshed.access_token)
    }

    /// Refresh regardless of expiry.
    pub async fn force_refresh(&self, user_id: Uuid) -> Result<ProviderTokens, AppError> {
        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let tokens = self.load_tokens(user_id).await?;
        self.refresh_locked(user_id, tokens).await
    }

    /// Caller must hold the refresh lock for `user_id`.
    async fn refresh_locked(
        &self,
        user_id: Uuid,
        current: ProviderTokens,
    ) -> Result<ProviderTokens, AppError> {
        let Some(refresh_token) = current.refresh_token.clone() else {
            tracing::warn!(user_id = %user_id, provider = %self.provider(), "No provider refresh token stored");
            return Err(AppError::ProviderReconnectRequired(
                self.provider().display_name().to_string(),
            ));
        };

        let response = self.client.refresh_token(&refresh_token).await?;
        let tokens = self.tokens_from_response(response, Some(&current))?;

        self.store
            .store_provider_tokens(user_id, self.provider(), &tokens)
            .await?;

        tracing::info!(
            user_id = %user_id,
            provider = %self.provider(),
            rotated = tokens.refresh_token != current.refresh_token,
            "Provider token refreshed"
        );
        Ok(tokens)
    }

    /// Build stored tokens, keeping the previous refresh token and scope
    /// when the provider did not send new ones.
    fn tokens_from_response(
        &self,
        response: TokenResponse,
        previous: Option<&ProviderTokens>,
    ) -> Result<ProviderTokens, AppError> {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = Some(expires_in)
            .filter(|secs| (1..=MAX_EXPIRES_IN_SECS).contains(secs))
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime))
            .ok_or_else(|| AppError::ProviderUnavailable {
                provider: self.provider().display_name().to_string(),
                reason: format!("token response with invalid expires_in {}", expires_in),
            })?;

        Ok(ProviderTokens {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            expires_at,
            scope: response
                .scope
                .or_else(|| previous.and_then(|p| p.scope.clone())),
        })
    }

    async fn load_tokens(&self, user_id: Uuid) -> Result<ProviderTokens, AppError> {
        self.store
            .get_provider_link(user_id, self.provider())
            .await?
            .and_then(|link| link.tokens())
            .ok_or_else(|| {
                AppError::ProviderNotConnected(self.provider().display_name().to_string())
            })
    }

    fn is_expired(&self, expires_at: DateTime<Utc>) -> bool {
        self.clock.now() > expires_at
    }

    fn refresh_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ─── Connection Management ───────────────────────────────────

    /// Clear stored tokens and any pending authorization.
    pub async fn disconnect(&self, user_id: Uuid) -> Result<bool, AppError> {
        let lock = self.refresh_lock(user_id);
        let _guard = lock.lock().await;

        let was_connected = self
            .store
            .clear_provider_tokens(user_id, self.provider())
            .await?;

        tracing::info!(
            user_id = %user_id,
            provider = %self.provider(),
            was_connected,
            "Provider disconnected"
        );
        Ok(was_connected)
    }

    pub async fn status(&self, user_id: Uuid) -> Result<ConnectionStatus, AppError> {
        let tokens = self
            .store
            .get_provider_link(user_id, self.provider())
            .await?
            .and_then(|link| link.tokens());

        Ok(ConnectionStatus {
            provider: self.provider(),
            connected: tokens.is_some(),
            expires_at: tokens.map(|t| format_utc_rfc3339(t.expires_at)),
        })
    }

    // ─── API Wrappers ────────────────────────────────────────────

    /// GET a provider API path with a guaranteed-valid token.
    pub async fn api_get(&self, user_id: Uuid, path: &str) -> Result<serde_json::Value, AppError> {
        let access_token = self.ensure_valid_access_token(user_id).await?;
        self.client.get_json(&access_token, path).await
    }

    /// POST to a provider API path with a guaranteed-valid token.
    pub async fn api_post(
        &self,
        user_id: Uuid,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let access_token = self.ensure_valid_access_token(user_id).await?;
        self.client.post_json(&access_token, path, body).await
    }
}

/// Configured providers, looked up by path segment.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    services: HashMap<Provider, ProviderService>,
}

impl ProviderRegistry {
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_http_timeout)
            .build()?;

        let services = config
            .providers()
            .map(|provider_config| {
                let client = ProviderClient::new(http.clone(), provider_config.clone());
                let service = ProviderService::new(
                    client,
                    store.clone(),
                    clock.clone(),
                    config.frontend_url.clone(),
                );
                (provider_config.provider, service)
            })
            .collect();

        Ok(Self { services })
    }

    pub fn get(&self, provider: Provider) -> Option<&ProviderService> {
        self.services.get(&provider)
    }

    /// Resolve a path segment. Unknown and unconfigured providers are `NotFound`.
    pub fn resolve(&self, name: &str) -> Result<&ProviderService, AppError> {
        Provider::parse(name)
            .and_then(|p| self.get(p))
            .ok_or_else(|| AppError::NotFound(format!("Provider '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ProviderClient {
        let config = Config::test_with_provider_base("https://provider.test");
        ProviderClient::new(reqwest::Client::new(), config.fitbit.unwrap())
    }

    #[test]
    fn test_authorization_url_carries_pkce_parameters() {
        let url = client().authorization_url("abc123", "challenge").unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        let query: HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://provider.test/fitbit/oauth2/authorize?"));
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "fitbit_client_id");
        assert_eq!(query["state"], "abc123");
        assert_eq!(query["code_challenge"], "challenge");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["scope"], "activity heartrate profile sleep");
        assert_eq!(
            query["redirect_uri"],
            "http://localhost:3000/api/auth/fitbit/callback"
        );
    }

    #[test]
    fn test_registry_resolves_only_configured_providers() {
        let mut config = Config::test_default();
        config.omron = None;
        let registry = ProviderRegistry::from_config(
            &config,
            Arc::new(crate::db::MemoryStore::new()),
            Arc::new(crate::time_utils::SystemClock),
        )
        .unwrap();

        assert!(registry.resolve("fitbit").is_ok());
        assert!(matches!(registry.resolve("omron"), Err(AppError::NotFound(_))));
        assert!(matches!(registry.resolve("garmin"), Err(AppError::NotFound(_))));
    }
}
