// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process credential store.
//!
//! Conditional operations hold the DashMap shard lock for the record they
//! test, so the compare and the write happen as one step.

use super::CredentialStore;
use crate::error::{AppError, DuplicateField};
use crate::models::user::normalize_email;
use crate::models::{
    Goals, PendingAuthorization, Provider, ProviderLink, ProviderTokens, RefreshSession,
    UserRecord,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, UserRecord>,
    emails: DashMap<String, Uuid>,
    usernames: DashMap<String, Uuid>,
    sessions: DashMap<Uuid, RefreshSession>,
    selectors: DashMap<String, Uuid>,
    links: DashMap<String, ProviderLink>,
    /// `{provider}:{state}` -> link key
    pending_states: DashMap<String, String>,
    goals: DashMap<Uuid, Goals>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_key(provider: Provider, state: &str) -> String {
        format!("{}:{}", provider.as_str(), state)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_user(&self, user: &UserRecord) -> Result<(), AppError> {
        let email = user.normalized_email();
        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => return Err(AppError::DuplicateKey(DuplicateField::Email)),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }

        match self.usernames.entry(user.username.clone()) {
            Entry::Occupied(_) => {
                self.emails.remove(&email);
                return Err(AppError::DuplicateKey(DuplicateField::Username));
            }
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }

        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let Some(id) = self.emails.get(&normalize_email(email)).map(|id| *id) else {
            return Ok(None);
        };
        self.get_user(id).await
    }

    async fn put_session(&self, session: &RefreshSession) -> Result<(), AppError> {
        if let Some(previous) = self.sessions.insert(session.user_id, session.clone()) {
            self.selectors.remove(&previous.selector);
        }
        self.selectors
            .insert(session.selector.clone(), session.user_id);
        Ok(())
    }

    async fn find_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        let Some(user_id) = self.selectors.get(selector).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&user_id)
            .filter(|s| s.selector == selector)
            .map(|s| s.clone()))
    }

    async fn rotate_session(
        &self,
        user_id: Uuid,
        expected_hash: &str,
        next: &RefreshSession,
    ) -> Result<bool, AppError> {
        let previous_selector = {
            let Some(mut current) = self.sessions.get_mut(&user_id) else {
                return Ok(false);
            };
            if !current.hash_matches(expected_hash) {
                return Ok(false);
            }
            std::mem::replace(&mut *current, next.clone()).selector
        };

        self.selectors.remove(&previous_selector);
        self.selectors.insert(next.selector.clone(), user_id);
        Ok(true)
    }

    async fn clear_session(&self, user_id: Uuid, expected_hash: &str) -> Result<bool, AppError> {
        match self
            .sessions
            .remove_if(&user_id, |_, s| s.hash_matches(expected_hash))
        {
            Some((_, removed)) => {
                self.selectors.remove(&removed.selector);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_provider_link(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<ProviderLink>, AppError> {
        Ok(self
            .links
            .get(&ProviderLink::key(user_id, provider))
            .map(|l| l.clone()))
    }

    async fn begin_authorization(
        &self,
        user_id: Uuid,
        provider: Provider,
        code_verifier: &str,
        state: &str,
    ) -> Result<(), AppError> {
        let key = ProviderLink::key(user_id, provider);
        let previous_state = {
            let mut link = self
                .links
                .entry(key.clone())
                .or_insert_with(|| ProviderLink::new(user_id, provider));
            link.code_verifier = Some(code_verifier.to_string());
            link.oauth_state.replace(state.to_string())
        };

        if let Some(previous) = previous_state {
            self.pending_states
                .remove(&Self::state_key(provider, &previous));
        }
        self.pending_states
            .insert(Self::state_key(provider, state), key);
        Ok(())
    }

    async fn take_pending_authorization(
        &self,
        provider: Provider,
        state: &str,
    ) -> Result<Option<PendingAuthorization>, AppError> {
        let Some((_, key)) = self.pending_states.remove(&Self::state_key(provider, state)) else {
            return Ok(None);
        };
        let Some(mut link) = self.links.get_mut(&key) else {
            return Ok(None);
        };
        if !link.state_matches(state) {
            return Ok(None);
        }

        link.oauth_state = None;
        let code_verifier = link.code_verifier.take().filter(|v| !v.is_empty());
        let user_id = Uuid::parse_str(&link.user_id)
            .map_err(|e| AppError::Database(format!("Corrupt provider link user id: {}", e)))?;

        Ok(Some(PendingAuthorization {
            user_id,
            code_verifier,
        }))
    }

    async fn store_provider_tokens(
        &self,
        user_id: Uuid,
        provider: Provider,
        tokens: &ProviderTokens,
    ) -> Result<(), AppError> {
        self.links
            .entry(ProviderLink::key(user_id, provider))
            .or_insert_with(|| ProviderLink::new(user_id, provider))
            .set_tokens(tokens);
        Ok(())
    }

    async fn clear_provider_tokens(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<bool, AppError> {
        let Some(mut link) = self.links.get_mut(&ProviderLink::key(user_id, provider)) else {
            return Ok(false);
        };
        let pending_state = link.oauth_state.clone();
        let was_connected = link.clear();
        drop(link);

        if let Some(state) = pending_state {
            self.pending_states
                .remove(&Self::state_key(provider, &state));
        }
        Ok(was_connected)
    }

    async fn get_goals(&self, user_id: Uuid) -> Result<Option<Goals>, AppError> {
        Ok(self.goals.get(&user_id).map(|g| *g))
    }

    async fn set_goals(&self, user_id: Uuid, goals: &Goals) -> Result<(), AppError> {
        self.goals.insert(user_id, *goals);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn user(username: &str, email: &str) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            created_at: Utc::now(),
        }
    }

    fn session(user_id: Uuid, selector: &str, hash: &str) -> RefreshSession {
        RefreshSession {
            user_id,
            selector: selector.to_string(),
            token_hash: hash.to_string(),
            expires_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_case_insensitive() {
        let store = MemoryStore::new();
        store.create_user(&user("alice", "a@x.com")).await.unwrap();

        let err = store
            .create_user(&user("alice2", "A@X.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey(DuplicateField::Email)));
    }

    #[tokio::test]
    async fn test_duplicate_username_releases_email_claim() {
        let store = MemoryStore::new();
        store.create_user(&user("alice", "a@x.com")).await.unwrap();

        let err = store
            .create_user(&user("alice", "b@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::DuplicateKey(DuplicateField::Username)
        ));

        // b@x.com must still be available
        store.create_user(&user("bob", "b@x.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rotate_session_requires_current_hash() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.put_session(&session(user_id, "s1", "h1")).await.unwrap();

        let next = session(user_id, "s2", "h2");
        assert!(store.rotate_session(user_id, "h1", &next).await.unwrap());
        assert!(!store.rotate_session(user_id, "h1", &next).await.unwrap());

        assert!(store.find_session_by_selector("s1").await.unwrap().is_none());
        assert_eq!(
            store.find_session_by_selector("s2").await.unwrap(),
            Some(next)
        );
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.put_session(&session(user_id, "s0", "h0")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let next = session(user_id, &format!("s{}", i + 1), &format!("h{}", i + 1));
                store.rotate_session(user_id, "h0", &next).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_pending_authorization_is_taken_once() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .begin_authorization(user_id, Provider::Fitbit, "verifier", "state-1")
            .await
            .unwrap();

        // Same state on another provider does not match
        assert!(store
            .take_pending_authorization(Provider::Omron, "state-1")
            .await
            .unwrap()
            .is_none());

        let pending = store
            .take_pending_authorization(Provider::Fitbit, "state-1")
            .await
            .unwrap()
            .expect("pending authorization");
        assert_eq!(pending.user_id, user_id);
        assert_eq!(pending.code_verifier.as_deref(), Some("verifier"));

        assert!(store
            .take_pending_authorization(Provider::Fitbit, "state-1")
            .await
            .unwrap()
            .is_none());

        let link = store
            .get_provider_link(user_id, Provider::Fitbit)
            .await
            .unwrap()
            .unwrap();
        assert!(link.code_verifier.is_none());
        assert!(link.oauth_state.is_none());
    }

    #[tokio::test]
    async fn test_new_connect_supersedes_earlier_state() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .begin_authorization(user_id, Provider::Omron, "v1", "old")
            .await
            .unwrap();
        store
            .begin_authorization(user_id, Provider::Omron, "v2", "new")
            .await
            .unwrap();

        assert!(store
            .take_pending_authorization(Provider::Omron, "old")
            .await
            .unwrap()
            .is_none());
        let pending = store
            .take_pending_authorization(Provider::Omron, "new")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.code_verifier.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_clear_provider_tokens_reports_connection() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        assert!(!store
            .clear_provider_tokens(user_id, Provider::Fitbit)
            .await
            .unwrap());

        let tokens = ProviderTokens {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: Utc::now() + Duration::hours(8),
            scope: None,
        };
        store
            .store_provider_tokens(user_id, Provider::Fitbit, &tokens)
            .await
            .unwrap();

        assert!(store
            .clear_provider_tokens(user_id, Provider::Fitbit)
            .await
            .unwrap());
        let link = store
            .get_provider_link(user_id, Provider::Fitbit)
            .await
            .unwrap()
            .unwrap();
        assert!(link.tokens().is_none());
    }
}
