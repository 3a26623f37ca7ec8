//! API key storage trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::{ApiKey, ApiKeyUsage};

/// Storage trait for API keys and their usage log.
#[async_trait]
pub trait ApiKeyStorage: Send + Sync {
    /// Finds a key by the SHA-256 hash of its secret.
    ///
    /// Returns keys regardless of active/expiry status; callers decide.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_hash(&self, key_hash: &str) -> AuthResult<Option<ApiKey>>;

    /// Finds a key by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<ApiKey>>;

    /// Stores a new key.
    ///
    /// # Errors
    ///
    /// Returns an error on a duplicate hash or storage failure.
    async fn create(&self, key: &ApiKey) -> AuthResult<()>;

    /// Marks a key inactive and records why.
    ///
    /// Returns `false` if no such key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn deactivate(&self, id: Uuid, reason: &str) -> AuthResult<bool>;

    /// Appends a usage entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn record_usage(&self, usage: &ApiKeyUsage) -> AuthResult<()>;
}
