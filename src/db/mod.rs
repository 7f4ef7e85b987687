//! Credential store: users, refresh sessions, provider links and goals.
//!
//! Two backends implement [`CredentialStore`]: Firestore for deployments and
//! an in-process DashMap store for local development and tests.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{
    Goals, PendingAuthorization, Provider, ProviderLink, ProviderTokens, RefreshSession,
    UserRecord,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Email uniqueness claims (keyed by normalized email)
    pub const USER_EMAILS: &str = "user_emails";
    /// Username uniqueness claims (keyed by username)
    pub const USER_NAMES: &str = "user_names";
    /// Refresh sessions (keyed by user id)
    pub const SESSIONS: &str = "sessions";
    /// Provider links (keyed by `{user_id}_{provider}`)
    pub const PROVIDER_LINKS: &str = "provider_links";
    pub const GOALS: &str = "goals";
}

/// Durable record of users and their credentials.
///
/// Operations that guard an invariant (`rotate_session`, `clear_session`,
/// `take_pending_authorization`) are single conditional steps: two callers
/// racing on the same precondition never both succeed.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new user. Fails with `DuplicateKey` naming the colliding field;
    /// email is checked first.
    async fn create_user(&self, user: &UserRecord) -> Result<(), AppError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, AppError>;

    /// Case-insensitive email lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError>;

    /// Replace the user's active refresh session.
    async fn put_session(&self, session: &RefreshSession) -> Result<(), AppError>;

    async fn find_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AppError>;

    /// Swap the session for `next` only if the stored hash is still `expected_hash`.
    async fn rotate_session(
        &self,
        user_id: Uuid,
        expected_hash: &str,
        next: &RefreshSession,
    ) -> Result<bool, AppError>;

    /// Remove the session if its hash is `expected_hash`.
    async fn clear_session(&self, user_id: Uuid, expected_hash: &str) -> Result<bool, AppError>;

    async fn get_provider_link(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<ProviderLink>, AppError>;

    /// Record pending PKCE material, replacing any earlier attempt.
    async fn begin_authorization(
        &self,
        user_id: Uuid,
        provider: Provider,
        code_verifier: &str,
        state: &str,
    ) -> Result<(), AppError>;

    /// Find the link whose pending state matches and clear verifier and state.
    /// Returns `None` when nothing matches, including on replay.
    async fn take_pending_authorization(
        &self,
        provider: Provider,
        state: &str,
    ) -> Result<Option<PendingAuthorization>, AppError>;

    async fn store_provider_tokens(
        &self,
        user_id: Uuid,
        provider: Provider,
        tokens: &ProviderTokens,
    ) -> Result<(), AppError>;

    /// Remove tokens and any pending authorization. Returns whether the link
    /// had tokens.
    async fn clear_provider_tokens(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<bool, AppError>;

    async fn get_goals(&self, user_id: Uuid) -> Result<Option<Goals>, AppError>;

    async fn set_goals(&self, user_id: Uuid, goals: &Goals) -> Result<(), AppError>;
}
