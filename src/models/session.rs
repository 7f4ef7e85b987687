// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application refresh session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// The single active refresh session of a user.
///
/// Only the Argon2 hash of the refresh token is kept. `selector` is the
/// public prefix of the token and is what the store indexes on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshSession {
    pub user_id: Uuid,
    pub selector: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Constant-time comparison with the stored hash.
    pub fn hash_matches(&self, expected_hash: &str) -> bool {
        self.token_hash
            .as_bytes()
            .ct_eq(expected_hash.as_bytes())
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_matches() {
        let session = RefreshSession {
            user_id: Uuid::new_v4(),
            selector: "sel".to_string(),
            token_hash: "$argon2id$abc".to_string(),
            expires_at: Utc::now(),
        };
        assert!(session.hash_matches("$argon2id$abc"));
        assert!(!session.hash_matches("$argon2id$abd"));
        assert!(!session.hash_matches(""));
    }
}
