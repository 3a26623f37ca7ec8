//! Resource ownership lookup trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::ownership::{ResourceOwner, ResourceType};

/// Reads the owning patient and clinic of guarded domain records.
#[async_trait]
pub trait ResourceOwnerStorage: Send + Sync {
    /// Returns the owner of `resource_type` instance `id`, or `None` if no
    /// such record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_owner(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> AuthResult<Option<ResourceOwner>>;
}
