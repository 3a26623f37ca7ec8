//! Ownership lookups over `patients`, `appointments` and `billing_records`.

use pedro_auth::{ResourceOwner, ResourceType};
use sqlx_core::query_as::query_as;
use uuid::Uuid;

use crate::{PgPool, StorageResult};

/// Owner query for a resource type. A patient record is owned by itself.
#[must_use]
pub fn owner_query(resource_type: ResourceType) -> String {
    match resource_type {
        ResourceType::Patient => {
            format!("SELECT id, clinic_id FROM {} WHERE id = $1", resource_type.table())
        }
        ResourceType::Appointment | ResourceType::Billing => format!(
            "SELECT patient_id, clinic_id FROM {} WHERE id = $1",
            resource_type.table()
        ),
    }
}

/// Ownership storage operations.
pub struct OwnershipStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> OwnershipStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Owning patient and clinic of a record, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_owner(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> StorageResult<Option<ResourceOwner>> {
        let row: Option<(Option<Uuid>, Option<Uuid>)> = query_as(&owner_query(resource_type))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(|(patient_id, clinic_id)| ResourceOwner {
            patient_id,
            clinic_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_queries() {
        assert_eq!(
            owner_query(ResourceType::Patient),
            "SELECT id, clinic_id FROM patients WHERE id = $1"
        );
        assert_eq!(
            owner_query(ResourceType::Billing),
            "SELECT patient_id, clinic_id FROM billing_records WHERE id = $1"
        );
        assert!(owner_query(ResourceType::Appointment).contains("FROM appointments"));
    }
}
