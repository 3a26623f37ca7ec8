//! Identity storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::Identity;

/// Storage trait for identities.
///
/// Identities are provisioned outside this crate. The authorization layer
/// reads them on every authenticated request and writes only credential
/// bookkeeping (password hash, last login).
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Finds an identity by id, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>>;

    /// Finds an identity by email. `email` is already lowercased.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>>;

    /// Replaces the stored password hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity does not exist or the operation fails.
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> AuthResult<()>;

    /// Records a successful login.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> AuthResult<()>;
}
