//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup. Provider credentials are optional:
//! a provider whose client ID is unset is simply not offered.

use crate::models::Provider;
use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;
const DEFAULT_PROVIDER_HTTP_TIMEOUT_SECS: u64 = 10;
const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 365;

/// Which credential store backend to build at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    Memory,
}

/// OAuth client settings for one external provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub scopes: String,
    /// Also send client credentials in the token request body (Omron).
    pub credentials_in_body: bool,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Public base URL of this API (used for default redirect URIs)
    pub base_url: String,
    /// Base of the app deep links used after OAuth completes
    pub frontend_url: String,
    /// HS256 signing key for access tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    /// Mark the refresh cookie `Secure`
    pub cookie_secure: bool,
    pub storage_backend: StorageBackend,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    pub provider_http_timeout: Duration,
    pub fitbit: Option<ProviderConfig>,
    pub omron: Option<ProviderConfig>,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let base_url = required("BASE_URL")?;
        let storage_backend = match optional("STORAGE_BACKEND").as_deref() {
            None | Some("firestore") => StorageBackend::Firestore,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_BACKEND",
                    reason: format!("unknown backend '{}'", other),
                })
            }
        };

        let gcp_project_id = match storage_backend {
            StorageBackend::Firestore => required("GCP_PROJECT_ID")?,
            StorageBackend::Memory => {
                optional("GCP_PROJECT_ID").unwrap_or_else(|| "local-dev".to_string())
            }
        };

        Ok(Self {
            port: parsed("PORT", DEFAULT_PORT)?,
            frontend_url: required("FRONTEND_URL")?,
            jwt_signing_key: required("JWT_SECRET")?.into_bytes(),
            access_token_ttl_minutes: bounded(
                "ACCESS_TOKEN_TTL_MINUTES",
                DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
                MAX_ACCESS_TOKEN_TTL_MINUTES,
            )?,
            refresh_token_ttl_days: bounded(
                "REFRESH_TOKEN_TTL_DAYS",
                DEFAULT_REFRESH_TOKEN_TTL_DAYS,
                MAX_REFRESH_TOKEN_TTL_DAYS,
            )?,
            cookie_secure: parsed("COOKIE_SECURE", true)?,
            storage_backend,
            gcp_project_id,
            provider_http_timeout: Duration::from_secs(parsed(
                "PROVIDER_HTTP_TIMEOUT_SECS",
                DEFAULT_PROVIDER_HTTP_TIMEOUT_SECS,
            )?),
            fitbit: provider_from_env(Provider::Fitbit, &base_url)?,
            omron: provider_from_env(Provider::Omron, &base_url)?,
            base_url,
        })
    }

    /// Config for tests: memory store, both providers pointed at `provider_base`.
    pub fn test_default() -> Self {
        Self::test_with_provider_base("http://127.0.0.1:9")
    }

    /// Test config whose provider endpoints all live under `provider_base`
    /// (typically a mock server URI).
    pub fn test_with_provider_base(provider_base: &str) -> Self {
        let base_url = "http://localhost:3000".to_string();
        let fitbit = test_provider(Provider::Fitbit, &base_url, provider_base);
        let omron = test_provider(Provider::Omron, &base_url, provider_base);

        Self {
            port: DEFAULT_PORT,
            base_url,
            frontend_url: "mhearts://app".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            access_token_ttl_minutes: DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            cookie_secure: false,
            storage_backend: StorageBackend::Memory,
            gcp_project_id: "test-project".to_string(),
            provider_http_timeout: Duration::from_secs(DEFAULT_PROVIDER_HTTP_TIMEOUT_SECS),
            fitbit: Some(fitbit),
            omron: Some(omron),
        }
    }

    /// Configured providers, in a stable order.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.fitbit.iter().chain(self.omron.iter())
    }
}

/// Production endpoints and scopes for each provider.
struct ProviderDefaults {
    authorize_url: &'static str,
    token_url: &'static str,
    api_base_url: &'static str,
    scopes: &'static str,
    credentials_in_body: bool,
}

fn provider_defaults(provider: Provider) -> ProviderDefaults {
    match provider {
        Provider::Fitbit => ProviderDefaults {
            authorize_url: "https://www.fitbit.com/oauth2/authorize",
            token_url: "https://api.fitbit.com/oauth2/token",
            api_base_url: "https://api.fitbit.com",
            scopes: "activity heartrate profile sleep",
            credentials_in_body: false,
        },
        Provider::Omron => ProviderDefaults {
            authorize_url: "https://prd-oauth-website.ohiomron.com/connect/authorize",
            token_url: "https://prd-oauth.ohiomron.com/prd/connect/token",
            api_base_url: "https://prd-oauth.ohiomron.com/prd",
            scopes: "bloodpressure activity weight temperature oxygen openid offline_access",
            credentials_in_body: true,
        },
    }
}

fn default_redirect_uri(base_url: &str, provider: Provider) -> String {
    format!(
        "{}/api/auth/{}/callback",
        base_url.trim_end_matches('/'),
        provider.as_str()
    )
}

fn provider_from_env(
    provider: Provider,
    base_url: &str,
) -> Result<Option<ProviderConfig>, ConfigError> {
    let prefix = provider.env_prefix();
    let Some(client_id) = optional(&format!("{}_CLIENT_ID", prefix)) else {
        tracing::warn!(provider = %provider, "Client ID not set, provider disabled");
        return Ok(None);
    };

    let client_secret = optional(&format!("{}_CLIENT_SECRET", prefix))
        .ok_or(ConfigError::Missing(provider.client_secret_var()))?;

    let mut redirect_uri = optional(&format!("{}_REDIRECT_URI", prefix));
    if redirect_uri.is_none() && provider == Provider::Omron {
        // Older deployments configured Omron through the bare name.
        redirect_uri = optional("REDIRECT_URI");
    }

    let defaults = provider_defaults(provider);
    let endpoint = |suffix: &str, fallback: &str| {
        optional(&format!("{}_{}", prefix, suffix)).unwrap_or_else(|| fallback.to_string())
    };

    Ok(Some(ProviderConfig {
        provider,
        client_id,
        client_secret,
        redirect_uri: redirect_uri.unwrap_or_else(|| default_redirect_uri(base_url, provider)),
        authorize_url: endpoint("AUTHORIZE_URL", defaults.authorize_url),
        token_url: endpoint("TOKEN_URL", defaults.token_url),
        api_base_url: endpoint("API_BASE_URL", defaults.api_base_url),
        scopes: defaults.scopes.to_string(),
        credentials_in_body: defaults.credentials_in_body,
    }))
}

fn test_provider(provider: Provider, base_url: &str, provider_base: &str) -> ProviderConfig {
    let defaults = provider_defaults(provider);
    let root = format!("{}/{}", provider_base.trim_end_matches('/'), provider.as_str());

    ProviderConfig {
        provider,
        client_id: format!("{}_client_id", provider.as_str()),
        client_secret: format!("{}_client_secret", provider.as_str()),
        redirect_uri: default_redirect_uri(base_url, provider),
        authorize_url: format!("{}/oauth2/authorize", root),
        token_url: format!("{}/oauth2/token", root),
        api_base_url: format!("{}/api", root),
        scopes: defaults.scopes.to_string(),
        credentials_in_body: defaults.credentials_in_body,
    }
}

fn optional(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    optional(var).ok_or(ConfigError::Missing(var))
}

fn parsed<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}

/// A positive count no larger than `max`.
fn bounded(var: &'static str, default: i64, max: i64) -> Result<i64, ConfigError> {
    let value = parsed(var, default)?;
    if !(1..=max).contains(&value) {
        return Err(ConfigError::Invalid {
            var,
            reason: format!("must be between 1 and {}", max),
        });
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("BASE_URL", "https://api.example.com/");
        env::set_var("FRONTEND_URL", "mhearts://app");
        env::set_var("JWT_SECRET", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("STORAGE_BACKEND", "memory");
        env::set_var("FITBIT_CLIENT_ID", "fitbit_id");
        env::set_var("FITBIT_CLIENT_SECRET", "fitbit_secret");
        env::remove_var("OMRON_CLIENT_ID");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.port, 3000);
        assert_eq!(config.access_token_ttl_minutes, 15);
        assert_eq!(config.refresh_token_ttl_days, 7);
        assert_eq!(config.storage_backend, StorageBackend::Memory);

        let fitbit = config.fitbit.expect("fitbit configured");
        assert_eq!(fitbit.client_id, "fitbit_id");
        assert_eq!(
            fitbit.redirect_uri,
            "https://api.example.com/api/auth/fitbit/callback"
        );
        assert_eq!(fitbit.token_url, "https://api.fitbit.com/oauth2/token");
        assert!(config.omron.is_none());
    }

    #[test]
    fn test_token_ttl_bounds() {
        env::set_var("MHEARTS_TEST_TTL", "0");
        assert!(matches!(
            bounded("MHEARTS_TEST_TTL", 7, 365),
            Err(ConfigError::Invalid { .. })
        ));

        env::set_var("MHEARTS_TEST_TTL", "9223372036854775807");
        assert!(bounded("MHEARTS_TEST_TTL", 7, 365).is_err());

        env::set_var("MHEARTS_TEST_TTL", "30");
        assert_eq!(bounded("MHEARTS_TEST_TTL", 7, 365).unwrap(), 30);

        env::remove_var("MHEARTS_TEST_TTL");
        assert_eq!(bounded("MHEARTS_TEST_TTL", 7, 365).unwrap(), 7);
    }

    #[test]
    fn test_default_routes_providers_to_mock_base() {
        let config = Config::test_with_provider_base("http://127.0.0.1:4000/");
        let omron = config.omron.clone().expect("omron configured");

        assert_eq!(omron.token_url, "http://127.0.0.1:4000/omron/oauth2/token");
        assert!(omron.credentials_in_body);
        assert_eq!(config.providers().count(), 2);
    }
}
