//! Audit record storage trait.

use async_trait::async_trait;

use crate::AuthResult;
use crate::audit::AuditRecord;

/// Append-only sink for audit records.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Appends a record. Records are never updated or deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn append(&self, record: &AuditRecord) -> AuthResult<()>;
}
