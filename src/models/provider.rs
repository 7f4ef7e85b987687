// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! External health providers and the per-user link to each of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// An external OAuth2 provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Fitbit,
    Omron,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Fitbit, Provider::Omron];

    /// Path segment and storage key.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Fitbit => "fitbit",
            Provider::Omron => "omron",
        }
    }

    /// Parse a path segment. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Fitbit => "Fitbit",
            Provider::Omron => "Omron",
        }
    }

    pub(crate) fn env_prefix(self) -> &'static str {
        match self {
            Provider::Fitbit => "FITBIT",
            Provider::Omron => "OMRON",
        }
    }

    pub(crate) fn client_secret_var(self) -> &'static str {
        match self {
            Provider::Fitbit => "FITBIT_CLIENT_SECRET",
            Provider::Omron => "OMRON_CLIENT_SECRET",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokens issued by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

/// OAuth relationship between one user and one provider.
///
/// Stored flat so the backends can query on `oauth_state`. The PKCE
/// verifier and state only exist between connect and callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderLink {
    pub user_id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
}

impl ProviderLink {
    pub fn new(user_id: Uuid, provider: Provider) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider: provider.as_str().to_string(),
            ..Default::default()
        }
    }

    /// Storage key: `{user_id}_{provider}`.
    pub fn key(user_id: Uuid, provider: Provider) -> String {
        format!("{}_{}", user_id, provider.as_str())
    }

    /// Current tokens, if the link is connected.
    pub fn tokens(&self) -> Option<ProviderTokens> {
        let access_token = self.access_token.clone().filter(|t| !t.is_empty())?;
        Some(ProviderTokens {
            access_token,
            refresh_token: self.refresh_token.clone().filter(|t| !t.is_empty()),
            expires_at: self.expires_at?,
            scope: self.scope.clone(),
        })
    }

    /// Whether `state` is the outstanding OAuth state, compared in constant time.
    pub fn state_matches(&self, state: &str) -> bool {
        self.oauth_state
            .as_deref()
            .is_some_and(|s| bool::from(s.as_bytes().ct_eq(state.as_bytes())))
    }

    pub fn is_connected(&self) -> bool {
        self.tokens().is_some()
    }

    pub fn set_tokens(&mut self, tokens: &ProviderTokens) {
        self.access_token = Some(tokens.access_token.clone());
        self.refresh_token = tokens.refresh_token.clone();
        self.expires_at = Some(tokens.expires_at);
        self.scope = tokens.scope.clone();
    }

    /// Remove tokens and any pending authorization. Returns whether tokens were present.
    pub fn clear(&mut self) -> bool {
        let was_connected = self.is_connected();
        self.access_token = None;
        self.refresh_token = None;
        self.expires_at = None;
        self.scope = None;
        self.code_verifier = None;
        self.oauth_state = None;
        was_connected
    }
}

/// Pending PKCE material consumed by a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub user_id: Uuid,
    pub code_verifier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_path_segment() {
        assert_eq!(Provider::parse("fitbit"), Some(Provider::Fitbit));
        assert_eq!(Provider::parse("omron"), Some(Provider::Omron));
        assert_eq!(Provider::parse("Fitbit"), None);
        assert_eq!(Provider::parse("garmin"), None);
    }

    #[test]
    fn test_empty_access_token_is_not_connected() {
        let mut link = ProviderLink::new(Uuid::new_v4(), Provider::Fitbit);
        link.access_token = Some(String::new());
        link.expires_at = Some(Utc::now());
        assert!(!link.is_connected());
    }

    #[test]
    fn test_state_matches_only_outstanding_state() {
        let mut link = ProviderLink::new(Uuid::new_v4(), Provider::Omron);
        assert!(!link.state_matches("abc"));

        link.oauth_state = Some("abc".to_string());
        assert!(link.state_matches("abc"));
        assert!(!link.state_matches("abd"));
        assert!(!link.state_matches(""));
    }
}
