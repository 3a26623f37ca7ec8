//! Session store trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::AuthResult;
use crate::session::SessionData;

/// Key/value store for server-side sessions with per-entry TTL.
///
/// Keys are full store keys (namespace prefix already applied).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session, or `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the entry is corrupt.
    async fn load(&self, key: &str) -> AuthResult<Option<SessionData>>;

    /// Writes a session, replacing any existing entry and resetting its TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn save(&self, key: &str, data: &SessionData, ttl: Duration) -> AuthResult<()>;

    /// Removes a session. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn destroy(&self, key: &str) -> AuthResult<()>;

    /// Drops expired entries and returns how many were removed. Stores
    /// that expire keys natively keep the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn purge_expired(&self) -> AuthResult<usize> {
        Ok(0)
    }

    /// Short name for logs (`redis`, `memory`).
    fn backend_name(&self) -> &'static str;
}
