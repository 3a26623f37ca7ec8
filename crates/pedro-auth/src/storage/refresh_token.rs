//! Refresh token storage trait.
//!
//! # Security Considerations
//!
//! - Tokens are stored as SHA-256 hashes only
//! - Consumption must be atomic: two concurrent refreshes with the same
//!   token must not both succeed
//! - Revocation is per identity, triggered by logout and password change

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::RefreshTokenRecord;

/// Storage trait for issued refresh token records.
#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    /// Stores a newly issued token record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    async fn create(&self, record: &RefreshTokenRecord) -> AuthResult<()>;

    /// Atomically revokes the record with `token_hash` if it is still valid
    /// at `now`, returning it.
    ///
    /// Returns `None` if the record is missing, already revoked or expired.
    /// Of several concurrent calls with the same hash, at most one returns
    /// `Some`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn consume(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshTokenRecord>>;

    /// Revokes every outstanding record for an identity.
    ///
    /// Returns the number of records revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> AuthResult<u64>;
}
