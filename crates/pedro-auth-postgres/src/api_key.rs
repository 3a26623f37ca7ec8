//! API key storage over `api_keys` and `api_key_usage`.

use pedro_auth::{ApiKey, ApiKeyUsage};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageError, StorageResult};

const SELECT_API_KEY: &str = r#"
    SELECT id, name, key_hash, key_prefix, permissions, rate_limit, is_active,
           expires_at, rotated_from, created_by, created_at, revoked_at, revoke_reason
    FROM api_keys
"#;

/// Raw `api_keys` row.
pub type ApiKeyRow = (
    Uuid,
    String,
    String,
    String,
    Option<Vec<String>>,
    Option<i32>,
    bool,
    Option<OffsetDateTime>,
    Option<Uuid>,
    Option<Uuid>,
    OffsetDateTime,
    Option<OffsetDateTime>,
    Option<String>,
);

/// Maps an `api_keys` row to an [`ApiKey`]. A non-positive limit reads as
/// no override.
#[must_use]
pub fn api_key_from_row(row: ApiKeyRow) -> ApiKey {
    let (
        id,
        name,
        key_hash,
        key_prefix,
        permissions,
        rate_limit,
        active,
        expires_at,
        rotated_from,
        created_by,
        created_at,
        revoked_at,
        revoke_reason,
    ) = row;
    ApiKey {
        id,
        name,
        key_hash,
        key_prefix,
        permissions,
        rate_limit: rate_limit
            .and_then(|limit| u32::try_from(limit).ok())
            .filter(|limit| *limit > 0),
        active,
        expires_at,
        rotated_from,
        created_by,
        created_at,
        revoked_at,
        revoke_reason,
    }
}

/// API key storage operations.
pub struct ApiKeyStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ApiKeyStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find a key by the SHA-256 hash of its secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_by_hash(&self, key_hash: &str) -> StorageResult<Option<ApiKey>> {
        let row: Option<ApiKeyRow> = query_as(&format!("{SELECT_API_KEY} WHERE key_hash = $1"))
            .bind(key_hash)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(api_key_from_row))
    }

    /// Find a key by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<ApiKey>> {
        let row: Option<ApiKeyRow> = query_as(&format!("{SELECT_API_KEY} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(api_key_from_row))
    }

    /// Insert a key.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the hash is already stored.
    pub async fn create(&self, key: &ApiKey) -> StorageResult<()> {
        let rate_limit = key
            .rate_limit
            .map(|limit| i32::try_from(limit).unwrap_or(i32::MAX));
        query(
            r#"
            INSERT INTO api_keys (id, name, key_hash, key_prefix, permissions, rate_limit,
                                  is_active, expires_at, rotated_from, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(key.id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.permissions)
        .bind(rate_limit)
        .bind(key.active)
        .bind(key.expires_at)
        .bind(key.rotated_from)
        .bind(key.created_by)
        .bind(key.created_at)
        .execute(self.pool)
        .await
        .map_err(|e| StorageError::from_insert(e, "API key"))?;
        Ok(())
    }

    /// Deactivate an active key. Returns `false` if it was already inactive
    /// or does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn deactivate(&self, id: Uuid, reason: &str) -> StorageResult<bool> {
        let result = query(
            r#"
            UPDATE api_keys
            SET is_active = FALSE, revoked_at = NOW(), revoke_reason = $2
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append a usage entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record_usage(&self, usage: &ApiKeyUsage) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO api_key_usage (api_key_id, endpoint, method, ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(usage.api_key_id)
        .bind(&usage.endpoint)
        .bind(&usage.method)
        .bind(&usage.ip_address)
        .bind(&usage.user_agent)
        .bind(usage.created_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(rate_limit: Option<i32>) -> ApiKeyRow {
        (
            Uuid::new_v4(),
            "Twilio".to_string(),
            ApiKey::hash_secret("sk_live_abc"),
            ApiKey::display_prefix("sk_live_abc"),
            Some(vec!["webhook:receive".to_string()]),
            rate_limit,
            true,
            None,
            None,
            None,
            OffsetDateTime::now_utc(),
            None,
            None,
        )
    }

    #[test]
    fn test_api_key_from_row() {
        let key = api_key_from_row(row(Some(50)));
        assert_eq!(key.rate_limit, Some(50));
        assert_eq!(key.effective_permissions(), vec!["webhook:receive".to_string()]);
        assert!(key.is_usable());
    }

    #[test]
    fn test_non_positive_limit_is_no_override() {
        assert_eq!(api_key_from_row(row(Some(0))).rate_limit, None);
        assert_eq!(api_key_from_row(row(Some(-5))).rate_limit, None);
        assert_eq!(api_key_from_row(row(None)).rate_limit, None);
    }
}
