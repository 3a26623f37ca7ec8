//! API key lifecycle: create, rotate, revoke.
//!
//! Secrets are returned exactly once, from [`ApiKeyManager::create`] and
//! [`ApiKeyManager::rotate`]. Only the SHA-256 hash and a short display
//! prefix are stored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::permission::default_permissions;
use crate::role::Role;
use crate::storage::ApiKeyStorage;
use crate::types::ApiKey;

/// Requests per window for keys created without an explicit limit.
pub const DEFAULT_RATE_LIMIT: u32 = 200;

/// Upper bound accepted for an explicit limit.
pub const MAX_RATE_LIMIT: u32 = 10_000;

/// Parameters for a new key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewApiKey {
    pub name: String,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// A stored key together with its secret, returned once.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    pub secret: String,
    pub key: ApiKey,
}

/// Administers API keys.
#[derive(Clone)]
pub struct ApiKeyManager {
    storage: Arc<dyn ApiKeyStorage>,
}

impl ApiKeyManager {
    #[must_use]
    pub fn new(storage: Arc<dyn ApiKeyStorage>) -> Self {
        Self { storage }
    }

    /// Creates a key.
    ///
    /// Missing permissions fall back to the API-client defaults and a
    /// missing limit to [`DEFAULT_RATE_LIMIT`].
    ///
    /// # Errors
    ///
    /// `INVALID_REQUEST` for a name outside 3..=100 characters, a limit
    /// outside 1..=10000, or an expiry in the past; storage errors otherwise.
    pub async fn create(&self, request: NewApiKey, created_by: Uuid) -> AuthResult<IssuedApiKey> {
        let name = request.name.trim().to_string();
        validate(&name, request.rate_limit, request.expires_at)?;

        let secret = ApiKey::generate_secret();
        let key = ApiKey {
            id: Uuid::new_v4(),
            name,
            key_hash: ApiKey::hash_secret(&secret),
            key_prefix: ApiKey::display_prefix(&secret),
            permissions: Some(
                request
                    .permissions
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| default_permissions(Role::ApiClient)),
            ),
            rate_limit: Some(request.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT)),
            active: true,
            expires_at: request.expires_at,
            rotated_from: None,
            created_by: Some(created_by),
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            revoke_reason: None,
        };
        self.storage.create(&key).await?;

        tracing::info!(
            api_key_id = %key.id,
            name = %key.name,
            created_by = %created_by,
            "API key created"
        );
        Ok(IssuedApiKey { secret, key })
    }

    /// Replaces key `id` with a new one carrying the same settings and
    /// deactivates the old key.
    ///
    /// # Errors
    ///
    /// `API_KEY_NOT_FOUND` if no key has `id`; storage errors otherwise.
    pub async fn rotate(&self, id: Uuid, rotated_by: Uuid) -> AuthResult<IssuedApiKey> {
        let old = self
            .storage
            .find_by_id(id)
            .await?
            .ok_or(AuthError::ApiKeyNotFound)?;

        let secret = ApiKey::generate_secret();
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: format!("{} (Rotated)", old.name),
            key_hash: ApiKey::hash_secret(&secret),
            key_prefix: ApiKey::display_prefix(&secret),
            permissions: old.permissions.clone(),
            rate_limit: old.rate_limit,
            active: true,
            expires_at: old.expires_at,
            rotated_from: Some(old.id),
            created_by: Some(rotated_by),
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            revoke_reason: None,
        };
        self.storage.create(&key).await?;
        self.storage.deactivate(old.id, "rotated").await?;

        tracing::info!(
            api_key_id = %key.id,
            rotated_from = %old.id,
            rotated_by = %rotated_by,
            "API key rotated"
        );
        Ok(IssuedApiKey { secret, key })
    }

    /// Deactivates key `id`. Revoking an already inactive key succeeds.
    ///
    /// # Errors
    ///
    /// `API_KEY_NOT_FOUND` if no key has `id`; storage errors otherwise.
    pub async fn revoke(&self, id: Uuid, revoked_by: Uuid) -> AuthResult<()> {
        if self.storage.find_by_id(id).await?.is_none() {
            return Err(AuthError::ApiKeyNotFound);
        }
        if self.storage.deactivate(id, "revoked").await? {
            tracing::info!(api_key_id = %id, revoked_by = %revoked_by, "API key revoked");
        }
        Ok(())
    }
}

fn validate(
    name: &str,
    rate_limit: Option<u32>,
    expires_at: Option<OffsetDateTime>,
) -> AuthResult<()> {
    let len = name.chars().count();
    if !(3..=100).contains(&len) {
        return Err(AuthError::invalid_request("Name must be 3-100 characters"));
    }
    if let Some(limit) = rate_limit
        && !(1..=MAX_RATE_LIMIT).contains(&limit)
    {
        return Err(AuthError::invalid_request(
            "Rate limit must be between 1 and 10000",
        ));
    }
    if let Some(expires_at) = expires_at
        && expires_at <= OffsetDateTime::now_utc()
    {
        return Err(AuthError::invalid_request("Expiry date must be in the future"));
    }
    Ok(())
}
