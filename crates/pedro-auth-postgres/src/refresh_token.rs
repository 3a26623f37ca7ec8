//! Refresh token storage over `refresh_tokens`.
//!
//! Only SHA-256 hashes are stored. Consumption is a single conditional
//! `UPDATE ... RETURNING`, so concurrent refreshes of one token see at most
//! one success.

use pedro_auth::RefreshTokenRecord;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageError, StorageResult};

/// Raw `refresh_tokens` row.
pub type RefreshTokenRow = (
    Uuid,
    Uuid,
    String,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
    Option<String>,
    Option<String>,
);

#[must_use]
pub fn record_from_row(row: RefreshTokenRow) -> RefreshTokenRecord {
    let (id, user_id, token_hash, created_at, expires_at, revoked_at, ip_address, user_agent) =
        row;
    RefreshTokenRecord {
        id,
        user_id,
        token_hash,
        created_at,
        expires_at,
        revoked_at,
        ip_address,
        user_agent,
    }
}

/// Refresh token storage operations.
pub struct RefreshTokenStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> RefreshTokenStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Store an issued token record.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the hash is already stored.
    pub async fn create(&self, record: &RefreshTokenRecord) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, created_at, expires_at,
                                        revoked_at, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .execute(self.pool)
        .await
        .map_err(|e| StorageError::from_insert(e, "refresh token"))?;
        Ok(())
    }

    /// Revoke the record for `token_hash` if it is unrevoked and unexpired at
    /// `now`, returning it.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn consume(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StorageResult<Option<RefreshTokenRecord>> {
        let row: Option<RefreshTokenRow> = query_as(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2
            RETURNING id, user_id, token_hash, created_at, expires_at, revoked_at,
                      ip_address, user_agent
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(record_from_row))
    }

    /// Revoke every outstanding token of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> StorageResult<u64> {
        let result = query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete records that expired before `before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn cleanup_expired(&self, before: OffsetDateTime) -> StorageResult<u64> {
        let result = query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(before)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_row() {
        let now = OffsetDateTime::now_utc();
        let record = record_from_row((
            Uuid::new_v4(),
            Uuid::new_v4(),
            RefreshTokenRecord::hash_token("token"),
            now,
            now + time::Duration::days(7),
            None,
            Some("203.0.113.9".to_string()),
            None,
        ));
        assert!(record.is_valid_at(now));
        assert_eq!(record.ip_address.as_deref(), Some("203.0.113.9"));
    }
}
