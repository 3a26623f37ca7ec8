//! Arc-owning storage adapters for use with the request pipeline.
//!
//! These adapters wrap the lifetime-based storage types and own an
//! `Arc<PgPool>`, so they can be handed out as `Arc<dyn Trait>`.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use pedro_auth::storage::{
    ApiKeyStorage as ApiKeyStorageTrait, AuditStorage as AuditStorageTrait,
    RefreshTokenStorage as RefreshTokenStorageTrait, ResourceOwnerStorage,
    UserStorage as UserStorageTrait,
};
use pedro_auth::{
    ApiKey, ApiKeyUsage, AuditRecord, AuthError, AuthResult, Identity, RefreshTokenRecord,
    ResourceOwner, ResourceType,
};

use crate::api_key::ApiKeyStorage;
use crate::audit::AuditStorage;
use crate::ownership::OwnershipStorage;
use crate::refresh_token::RefreshTokenStorage;
use crate::user::UserStorage;
use crate::{PgPool, StorageError};

fn store_error(error: StorageError) -> AuthError {
    tracing::error!(error = %error, "Auth storage operation failed");
    AuthError::from(error)
}

// =============================================================================
// Users
// =============================================================================

/// Arc-owning PostgreSQL identity storage adapter.
#[derive(Clone)]
pub struct ArcUserStorage {
    pool: Arc<PgPool>,
}

impl ArcUserStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStorageTrait for ArcUserStorage {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>> {
        UserStorage::new(&self.pool)
            .find_by_id(id)
            .await
            .map_err(store_error)
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        UserStorage::new(&self.pool)
            .find_by_email(email)
            .await
            .map_err(store_error)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> AuthResult<()> {
        match UserStorage::new(&self.pool)
            .update_password_hash(id, password_hash)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(AuthError::UserNotFound),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        UserStorage::new(&self.pool)
            .record_login(id, at)
            .await
            .map_err(store_error)
    }
}

// =============================================================================
// API Keys
// =============================================================================

/// Arc-owning PostgreSQL API key storage adapter.
#[derive(Clone)]
pub struct ArcApiKeyStorage {
    pool: Arc<PgPool>,
}

impl ArcApiKeyStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStorageTrait for ArcApiKeyStorage {
    async fn find_by_hash(&self, key_hash: &str) -> AuthResult<Option<ApiKey>> {
        ApiKeyStorage::new(&self.pool)
            .find_by_hash(key_hash)
            .await
            .map_err(store_error)
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<ApiKey>> {
        ApiKeyStorage::new(&self.pool)
            .find_by_id(id)
            .await
            .map_err(store_error)
    }

    async fn create(&self, key: &ApiKey) -> AuthResult<()> {
        ApiKeyStorage::new(&self.pool)
            .create(key)
            .await
            .map_err(store_error)
    }

    async fn deactivate(&self, id: Uuid, reason: &str) -> AuthResult<bool> {
        ApiKeyStorage::new(&self.pool)
            .deactivate(id, reason)
            .await
            .map_err(store_error)
    }

    async fn record_usage(&self, usage: &ApiKeyUsage) -> AuthResult<()> {
        ApiKeyStorage::new(&self.pool)
            .record_usage(usage)
            .await
            .map_err(store_error)
    }
}

// =============================================================================
// Refresh Tokens
// =============================================================================

/// Arc-owning PostgreSQL refresh token storage adapter.
#[derive(Clone)]
pub struct ArcRefreshTokenStorage {
    pool: Arc<PgPool>,
}

impl ArcRefreshTokenStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStorageTrait for ArcRefreshTokenStorage {
    async fn create(&self, record: &RefreshTokenRecord) -> AuthResult<()> {
        RefreshTokenStorage::new(&self.pool)
            .create(record)
            .await
            .map_err(store_error)
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshTokenRecord>> {
        RefreshTokenStorage::new(&self.pool)
            .consume(token_hash, now)
            .await
            .map_err(store_error)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> AuthResult<u64> {
        RefreshTokenStorage::new(&self.pool)
            .revoke_all_for_user(user_id)
            .await
            .map_err(store_error)
    }
}

// =============================================================================
// Ownership
// =============================================================================

/// Arc-owning PostgreSQL ownership storage adapter.
#[derive(Clone)]
pub struct ArcOwnershipStorage {
    pool: Arc<PgPool>,
}

impl ArcOwnershipStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceOwnerStorage for ArcOwnershipStorage {
    async fn find_owner(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> AuthResult<Option<ResourceOwner>> {
        OwnershipStorage::new(&self.pool)
            .find_owner(resource_type, id)
            .await
            .map_err(store_error)
    }
}

// =============================================================================
// Audit
// =============================================================================

/// Arc-owning PostgreSQL audit storage adapter.
#[derive(Clone)]
pub struct ArcAuditStorage {
    pool: Arc<PgPool>,
}

impl ArcAuditStorage {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStorageTrait for ArcAuditStorage {
    async fn append(&self, record: &AuditRecord) -> AuthResult<()> {
        AuditStorage::new(&self.pool)
            .append(record)
            .await
            .map_err(AuthError::from)
    }
}
