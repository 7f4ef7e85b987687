// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Opaque refresh tokens and password hashing.
//!
//! A refresh token looks like `<selector>.<secret>`. The selector (16 random
//! bytes, hex) is stored in clear and used to find the session; the secret
//! (32 random bytes, hex) never leaves the client. Only an Argon2id hash of
//! the whole token is stored.
//!
//! Everything here is synchronous and CPU-bound. Callers on the async runtime
//! run the hashing functions through `spawn_blocking`.

use crate::error::AppError;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};

const SELECTOR_BYTES: usize = 16;
const SECRET_BYTES: usize = 32;

/// Default refresh token lifetime.
pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 7;

/// Fill a fixed-size buffer from the system CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], AppError> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
    Ok(buf)
}

/// Generate a new refresh token.
pub fn generate_refresh_token() -> Result<String, AppError> {
    let selector = random_bytes::<SELECTOR_BYTES>()?;
    let secret = random_bytes::<SECRET_BYTES>()?;
    Ok(format!("{}.{}", hex::encode(selector), hex::encode(secret)))
}

/// Extract the selector of a well-formed token.
///
/// Returns `None` for anything that did not come from [`generate_refresh_token`].
pub fn selector_of(token: &str) -> Option<&str> {
    let (selector, secret) = token.split_once('.')?;
    let well_formed = |part: &str, bytes: usize| {
        part.len() == bytes * 2 && part.bytes().all(|b| b.is_ascii_hexdigit())
    };

    (well_formed(selector, SELECTOR_BYTES) && well_formed(secret, SECRET_BYTES))
        .then_some(selector)
}

/// Salted Argon2id hash of a refresh token.
pub fn hash_refresh_token(token: &str) -> Result<String, AppError> {
    argon2_hash(token.as_bytes())
}

/// Check a token against its stored hash. Malformed input yields `false`.
pub fn verify_refresh_token(token: &str, hash: &str) -> bool {
    argon2_verify(token.as_bytes(), hash)
}

/// Absolute expiry `days` after `now`.
pub fn refresh_token_expiration(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now + Duration::days(days)
}

/// True once `now` is strictly past `expires_at`.
pub fn is_refresh_token_expired(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> bool {
    now > expires_at
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    argon2_hash(password.as_bytes())
}

/// Verify a password. A corrupt stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    argon2_verify(password.as_bytes(), hash)
}

fn argon2_hash(input: &[u8]) -> Result<String, AppError> {
    let salt_bytes = random_bytes::<16>()?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode salt: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(input, &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to hash secret: {}", e)))?;

    Ok(hash.to_string())
}

fn argon2_verify(input: &[u8], hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored hash is not a valid PHC string");
        return false;
    };

    Argon2::default().verify_password(input, &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let token = generate_refresh_token().unwrap();
        let (selector, secret) = token.split_once('.').unwrap();
        assert_eq!(selector.len(), 32);
        assert_eq!(secret.len(), 64);
        assert_eq!(selector_of(&token), Some(selector));
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_refresh_token().unwrap();
        let b = generate_refresh_token().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_selector_rejects_malformed() {
        assert_eq!(selector_of(""), None);
        assert_eq!(selector_of("no-dot-here"), None);
        assert_eq!(selector_of(&format!("{}.{}", "zz".repeat(16), "a".repeat(64))), None);
        assert_eq!(selector_of(&format!("{}.{}", "a".repeat(32), "a".repeat(63))), None);
    }

    #[test]
    fn test_hash_is_opaque_and_verifies() {
        let token = generate_refresh_token().unwrap();
        let other = generate_refresh_token().unwrap();
        let hash = hash_refresh_token(&token).unwrap();

        assert!(!hash.contains(&token));
        assert!(!hash.contains(token.split_once('.').unwrap().1));
        assert!(verify_refresh_token(&token, &hash));
        assert!(!verify_refresh_token(&other, &hash));
    }

    #[test]
    fn test_hash_is_salted() {
        let token = generate_refresh_token().unwrap();
        assert_ne!(
            hash_refresh_token(&token).unwrap(),
            hash_refresh_token(&token).unwrap()
        );
    }

    #[test]
    fn test_verify_fails_closed_on_garbage_hash() {
        assert!(!verify_refresh_token("anything", ""));
        assert!(!verify_refresh_token("anything", "not-a-phc-string"));
        assert!(!verify_password("pw", "$argon2id$broken"));
    }

    #[test]
    fn test_expiry_monotonicity() {
        let now = Utc::now();
        let expires_at = refresh_token_expiration(now, DEFAULT_REFRESH_TOKEN_DAYS);

        assert!(!is_refresh_token_expired(now, expires_at));
        assert!(!is_refresh_token_expired(expires_at, expires_at));
        assert!(is_refresh_token_expired(
            now + Duration::days(7) + Duration::seconds(1),
            expires_at
        ));
    }

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("S3cr3t!").unwrap();
        assert!(verify_password("S3cr3t!", &hash));
        assert!(!verify_password("wrong", &hash));
    }
}
