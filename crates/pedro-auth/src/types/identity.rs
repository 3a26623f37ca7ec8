//! Identity domain type.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::permission::default_permissions;
use crate::role::Role;

/// An authenticated principal as stored in the credential store.
///
/// Identities are deactivated rather than deleted; a deactivated identity is
/// rejected on its next request even if it still holds an unexpired token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,

    /// Login email, stored lowercased.
    pub email: String,

    pub role: Role,

    /// Inactive identities fail authentication with `USER_DEACTIVATED`.
    pub active: bool,

    /// Clinic (tenant) the identity belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<Uuid>,

    /// Argon2 PHC string. Never serialized.
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,

    /// Explicit permission list replacing the role's default list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub last_login_at: Option<OffsetDateTime>,
}

impl Identity {
    /// Creates an active identity with no clinic, password or overrides.
    #[must_use]
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into().to_lowercase(),
            role,
            active: true,
            clinic_id: None,
            password_hash: None,
            permissions: None,
            created_at: OffsetDateTime::now_utc(),
            last_login_at: None,
        }
    }

    #[must_use]
    pub fn with_clinic(mut self, clinic_id: Uuid) -> Self {
        self.clinic_id = Some(clinic_id);
        self
    }

    #[must_use]
    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    #[must_use]
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// The permission list used for authorization decisions: the explicit
    /// override when present, otherwise the role's static list.
    #[must_use]
    pub fn effective_permissions(&self) -> Vec<String> {
        match &self.permissions {
            Some(list) if !list.is_empty() => list.clone(),
            _ => default_permissions(self.role),
        }
    }
}
