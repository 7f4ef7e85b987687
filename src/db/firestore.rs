// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing the credential store.
//!
//! Provides typed operations for:
//! - Users plus email/username uniqueness claims
//! - Refresh sessions (one per user, queried by selector)
//! - Provider links (tokens and pending PKCE material)
//! - Goals
//!
//! Compare-and-set operations read inside a Firestore transaction, so a
//! concurrent writer on any instance aborts the commit. Uniqueness claims are
//! created with an exists(false) precondition.

use super::{collections, CredentialStore};
use crate::error::{AppError, DuplicateField};
use crate::models::user::normalize_email;
use crate::models::{
    Goals, PendingAuthorization, Provider, ProviderLink, ProviderTokens, RefreshSession,
    UserRecord,
};
use async_trait::async_trait;
use firestore::{
    FirestoreConsistencySelector, FirestoreTransaction, FirestoreWritePrecondition,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document in the uniqueness claim collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UniqueClaim {
    user_id: String,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}
impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client for testing.
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Begin a read-write transaction, plus a client whose reads run inside it
    /// and so register for conflict detection.
    async fn begin(
        &self,
    ) -> Result<(firestore::FirestoreDb, FirestoreTransaction<'_>), AppError> {
        let client = self.get_client()?;
        let transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
        let reader = client.clone_with_consistency_selector(
            FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
        );
        Ok((reader, transaction))
    }

    async fn get_doc<T>(&self, collection: &str, id: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> Deserialize<'de> + Send,
    {
        read_doc(self.get_client()?, collection, id).await
    }

    /// Queue an upsert in `transaction`.
    fn write_in<T>(
        &self,
        transaction: &mut FirestoreTransaction<'_>,
        collection: &str,
        id: &str,
        doc: &T,
    ) -> Result<(), AppError>
    where
        T: Serialize + for<'de> Deserialize<'de> + Send + Sync,
    {
        self.get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(doc)
            .add_to_transaction(transaction)
            .map_err(|e| AppError::Database(format!("Failed to add write to transaction: {}", e)))?;
        Ok(())
    }

    async fn set_doc<T>(&self, collection: &str, id: &str, doc: &T) -> Result<(), AppError>
    where
        T: Serialize + for<'de> Deserialize<'de> + Send + Sync,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(doc)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Read-modify-write one provider link in a transaction. `modify` returns
    /// `None` to leave the document untouched.
    async fn modify_link<R>(
        &self,
        user_id: Uuid,
        provider: Provider,
        modify: impl FnOnce(Option<ProviderLink>) -> Option<(ProviderLink, R)> + Send,
    ) -> Result<Option<R>, AppError>
    where
        R: Send,
    {
        let key = ProviderLink::key(user_id, provider);
        let (reader, mut transaction) = self.begin().await?;

        let current = read_doc(&reader, collections::PROVIDER_LINKS, &key).await?;
        let Some((link, result)) = modify(current) else {
            let _ = transaction.rollback().await;
            return Ok(None);
        };

        self.write_in(&mut transaction, collections::PROVIDER_LINKS, &key, &link)?;
        commit(transaction).await?;
        Ok(Some(result))
    }

    async fn find_link_by_state(
        &self,
        provider: Provider,
        state: &str,
    ) -> Result<Option<ProviderLink>, AppError> {
        let links: Vec<ProviderLink> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::PROVIDER_LINKS)
            .filter(|q| {
                q.for_all([
                    q.field("provider").eq(provider.as_str()),
                    q.field("oauth_state").eq(state),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(links.into_iter().next())
    }
}

#[async_trait]
impl CredentialStore for FirestoreDb {
    // ─── User Operations ─────────────────────────────────────────

    async fn create_user(&self, user: &UserRecord) -> Result<(), AppError> {
        let email = user.normalized_email();
        let claim = UniqueClaim {
            user_id: user.id.to_string(),
        };
        let client = self.get_client()?;
        let (reader, mut transaction) = self.begin().await?;

        let existing = duplicate_claim(&reader, &email, &user.username).await?;
        if let Some(field) = existing {
            let _ = transaction.rollback().await;
            return Err(AppError::DuplicateKey(field));
        }

        let writes = [
            (collections::USERS, user.id.to_string()),
            (collections::USER_EMAILS, email.clone()),
            (collections::USER_NAMES, user.username.clone()),
        ];
        for (collection, id) in &writes {
            // Each document must not exist yet, whichever instance commits first.
            let builder = client
                .fluent()
                .update()
                .in_col(collection)
                .precondition(FirestoreWritePrecondition::Exists(false))
                .document_id(id);
            let queued = if *collection == collections::USERS {
                builder.object(user).add_to_transaction(&mut transaction)
            } else {
                builder.object(&claim).add_to_transaction(&mut transaction)
            };
            queued.map_err(|e| {
                AppError::Database(format!("Failed to add {} to transaction: {}", collection, e))
            })?;
        }

        if let Err(e) = transaction.commit().await {
            // A claim created since our read fails the precondition.
            if let Some(field) = duplicate_claim(client, &email, &user.username).await? {
                tracing::info!(field = ?field, "Registration lost a uniqueness race");
                return Err(AppError::DuplicateKey(field));
            }
            return Err(AppError::Database(format!("Transaction commit failed: {}", e)));
        }

        tracing::info!(user_id = %user.id, "User created");
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, AppError> {
        self.get_doc(collections::USERS, &id.to_string()).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let Some(claim) = self
            .get_doc::<UniqueClaim>(collections::USER_EMAILS, &normalize_email(email))
            .await?
        else {
            return Ok(None);
        };
        self.get_doc(collections::USERS, &claim.user_id).await
    }

    // ─── Session Operations ──────────────────────────────────────

    async fn put_session(&self, session: &RefreshSession) -> Result<(), AppError> {
        self.set_doc(collections::SESSIONS, &session.user_id.to_string(), session)
            .await
    }

    async fn find_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        let sessions: Vec<RefreshSession> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::SESSIONS)
            .filter(|q| q.for_all([q.field("selector").eq(selector)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(sessions.into_iter().next())
    }

    async fn rotate_session(
        &self,
        user_id: Uuid,
        expected_hash: &str,
        next: &RefreshSession,
    ) -> Result<bool, AppError> {
        let id = user_id.to_string();
        let (reader, mut transaction) = self.begin().await?;

        let current: Option<RefreshSession> =
            read_doc(&reader, collections::SESSIONS, &id).await?;
        if !current.is_some_and(|c| c.hash_matches(expected_hash)) {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        self.write_in(&mut transaction, collections::SESSIONS, &id, next)?;
        commit(transaction).await?;
        Ok(true)
    }

    async fn clear_session(&self, user_id: Uuid, expected_hash: &str) -> Result<bool, AppError> {
        let id = user_id.to_string();
        let (reader, mut transaction) = self.begin().await?;

        let current: Option<RefreshSession> =
            read_doc(&reader, collections::SESSIONS, &id).await?;
        if !current.is_some_and(|c| c.hash_matches(expected_hash)) {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        self.get_client()?
            .fluent()
            .delete()
            .from(collections::SESSIONS)
            .document_id(&id)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Failed to add delete to transaction: {}", e)))?;
        commit(transaction).await?;
        Ok(true)
    }

    // ─── Provider Link Operations ────────────────────────────────

    async fn get_provider_link(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<ProviderLink>, AppError> {
        self.get_doc(
            collections::PROVIDER_LINKS,
            &ProviderLink::key(user_id, provider),
        )
        .await
    }

    async fn begin_authorization(
        &self,
        user_id: Uuid,
        provider: Provider,
        code_verifier: &str,
        state: &str,
    ) -> Result<(), AppError> {
        self.modify_link(user_id, provider, |current| {
            let mut link = current.unwrap_or_else(|| ProviderLink::new(user_id, provider));
            link.code_verifier = Some(code_verifier.to_string());
            link.oauth_state = Some(state.to_string());
            Some((link, ()))
        })
        .await?;
        Ok(())
    }

    async fn take_pending_authorization(
        &self,
        provider: Provider,
        state: &str,
    ) -> Result<Option<PendingAuthorization>, AppError> {
        let Some(found) = self.find_link_by_state(provider, state).await? else {
            return Ok(None);
        };
        let user_id = Uuid::parse_str(&found.user_id)
            .map_err(|e| AppError::Database(format!("Corrupt provider link user id: {}", e)))?;

        // Re-read in the transaction: a concurrent callback may have consumed it.
        self.modify_link(user_id, provider, |current| {
            let mut link = current.filter(|link| link.state_matches(state))?;
            link.oauth_state = None;
            let code_verifier = link.code_verifier.take().filter(|v| !v.is_empty());
            Some((
                link,
                PendingAuthorization {
                    user_id,
                    code_verifier,
                },
            ))
        })
        .await
    }

    async fn store_provider_tokens(
        &self,
        user_id: Uuid,
        provider: Provider,
        tokens: &ProviderTokens,
    ) -> Result<(), AppError> {
        self.modify_link(user_id, provider, |current| {
            let mut link = current.unwrap_or_else(|| ProviderLink::new(user_id, provider));
            link.set_tokens(tokens);
            Some((link, ()))
        })
        .await?;
        Ok(())
    }

    async fn clear_provider_tokens(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<bool, AppError> {
        let was_connected = self
            .modify_link(user_id, provider, |current| {
                let mut link = current?;
                let was_connected = link.clear();
                Some((link, was_connected))
            })
            .await?;
        Ok(was_connected.unwrap_or(false))
    }

    // ─── Goals ───────────────────────────────────────────────────

    async fn get_goals(&self, user_id: Uuid) -> Result<Option<Goals>, AppError> {
        self.get_doc(collections::GOALS, &user_id.to_string()).await
    }

    async fn set_goals(&self, user_id: Uuid, goals: &Goals) -> Result<(), AppError> {
        self.set_doc(collections::GOALS, &user_id.to_string(), goals)
            .await
    }
}

async fn read_doc<T>(
    client: &firestore::FirestoreDb,
    collection: &str,
    id: &str,
) -> Result<Option<T>, AppError>
where
    T: for<'de> Deserialize<'de> + Send,
{
    client
        .fluent()
        .select()
        .by_id_in(collection)
        .obj()
        .one(id)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

/// Which uniqueness claim, if any, is already taken.
async fn duplicate_claim(
    client: &firestore::FirestoreDb,
    email: &str,
    username: &str,
) -> Result<Option<DuplicateField>, AppError> {
    if read_doc::<UniqueClaim>(client, collections::USER_EMAILS, email)
        .await?
        .is_some()
    {
        return Ok(Some(DuplicateField::Email));
    }
    if read_doc::<UniqueClaim>(client, collections::USER_NAMES, username)
        .await?
        .is_some()
    {
        return Ok(Some(DuplicateField::Username));
    }
    Ok(None)
}

async fn commit(transaction: FirestoreTransaction<'_>) -> Result<(), AppError> {
    transaction
        .commit()
        .await
        .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
    Ok(())
}
