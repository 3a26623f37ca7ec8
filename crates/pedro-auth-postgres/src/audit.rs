//! Append-only audit storage over `audit_logs`.

use pedro_auth::AuditRecord;
use sqlx_core::query::query;

use crate::{PgPool, StorageResult};

/// Audit storage operations.
pub struct AuditStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> AuditStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append a record. Records are never updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append(&self, record: &AuditRecord) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO audit_logs (id, user_id, action, resource_type, resource_id,
                                    ip_address, user_agent, request_method, request_path,
                                    response_status, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(&record.request_method)
        .bind(&record.request_path)
        .bind(i32::from(record.response_status))
        .bind(&record.metadata)
        .bind(record.created_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}
