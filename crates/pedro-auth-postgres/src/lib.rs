//! PostgreSQL storage backend for Pedro Auth
//!
//! Provides persistent storage for:
//!
//! - Identities (`users`)
//! - API keys and their usage log (`api_keys`, `api_key_usage`)
//! - Issued refresh tokens (`refresh_tokens`)
//! - Ownership of guarded records (`patients`, `appointments`, `billing_records`)
//! - The audit trail (`audit_logs`)
//!
//! Sessions are not stored here; they live in Redis or the in-memory store.
//!
//! # Example
//!
//! ```ignore
//! use pedro_auth_postgres::PostgresAuthStorage;
//!
//! let storage = PostgresAuthStorage::connect("postgres://localhost/pedro", 10).await?;
//! storage.migrate().await?;
//!
//! let users: Arc<dyn pedro_auth::UserStorage> = Arc::new(storage.user_storage());
//! ```

pub mod api_key;
pub mod audit;
pub mod migrations;
pub mod ownership;
pub mod refresh_token;
pub mod storage_adapters;
pub mod user;

use std::sync::Arc;

use pedro_auth::AuthError;
use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use api_key::ApiKeyStorage;
pub use audit::AuditStorage;
pub use ownership::OwnershipStorage;
pub use refresh_token::RefreshTokenStorage;
pub use storage_adapters::{
    ArcApiKeyStorage, ArcAuditStorage, ArcOwnershipStorage, ArcRefreshTokenStorage,
    ArcUserStorage,
};
pub use user::UserStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during auth storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested row was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row already exists (unique constraint).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be mapped to a domain type.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StorageError {
    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidData` error.
    #[must_use]
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    /// Maps unique violations to `Conflict`, everything else to `Database`.
    #[must_use]
    pub fn from_insert(error: sqlx_core::Error, what: &str) -> Self {
        match &error {
            sqlx_core::Error::Database(db) if db.is_unique_violation() => {
                Self::conflict(format!("{what} already exists"))
            }
            _ => Self::Database(error),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if this is a server error (5xx equivalent).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::InvalidData(_) | Self::Migration(_)
        )
    }
}

impl From<StorageError> for AuthError {
    fn from(error: StorageError) -> Self {
        AuthError::storage(error.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL Auth Storage
// =============================================================================

/// PostgreSQL storage backend for authentication data.
///
/// Holds the connection pool and hands out the per-table storage types.
#[derive(Debug, Clone)]
pub struct PostgresAuthStorage {
    pool: Arc<PgPool>,
}

impl PostgresAuthStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `Migration` if a migration fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        migrations::run(&self.pool).await
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn pool_arc(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    // -------------------------------------------------------------------------
    // Storage Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn users(&self) -> UserStorage<'_> {
        UserStorage::new(&self.pool)
    }

    #[must_use]
    pub fn api_keys(&self) -> ApiKeyStorage<'_> {
        ApiKeyStorage::new(&self.pool)
    }

    #[must_use]
    pub fn refresh_tokens(&self) -> RefreshTokenStorage<'_> {
        RefreshTokenStorage::new(&self.pool)
    }

    #[must_use]
    pub fn ownership(&self) -> OwnershipStorage<'_> {
        OwnershipStorage::new(&self.pool)
    }

    #[must_use]
    pub fn audit(&self) -> AuditStorage<'_> {
        AuditStorage::new(&self.pool)
    }

    // -------------------------------------------------------------------------
    // Trait Adapters
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn user_storage(&self) -> ArcUserStorage {
        ArcUserStorage::new(self.pool_arc())
    }

    #[must_use]
    pub fn api_key_storage(&self) -> ArcApiKeyStorage {
        ArcApiKeyStorage::new(self.pool_arc())
    }

    #[must_use]
    pub fn refresh_token_storage(&self) -> ArcRefreshTokenStorage {
        ArcRefreshTokenStorage::new(self.pool_arc())
    }

    #[must_use]
    pub fn ownership_storage(&self) -> ArcOwnershipStorage {
        ArcOwnershipStorage::new(self.pool_arc())
    }

    #[must_use]
    pub fn audit_storage(&self) -> ArcAuditStorage {
        ArcAuditStorage::new(self.pool_arc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StorageError::not_found("user").is_not_found());
        assert!(StorageError::conflict("api key").is_conflict());
        assert!(StorageError::invalid_data("role").is_server_error());
        assert!(!StorageError::not_found("user").is_server_error());
    }

    #[test]
    fn test_storage_error_maps_to_internal_error() {
        let err: AuthError = StorageError::invalid_data("unknown role 'root'").into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.status().as_u16(), 500);
    }
}
