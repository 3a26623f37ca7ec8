//! Authenticated request context.

use serde::Serialize;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::permission::permissions_allow;
use crate::role::Role;
use crate::types::{ApiKey, Identity};

/// How the request authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// `Authorization: Bearer <access token>`.
    Bearer,
    /// `X-API-Key` header or `api_key` query parameter.
    ApiKey {
        key_id: Uuid,
        name: String,
        /// Per-key request budget, overriding the role default.
        rate_limit: Option<u32>,
    },
}

/// The single resolved principal and permission set of a request.
///
/// Produced by the authenticator from live store data, never from token
/// claims alone.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    /// Identity id, or the API key id for API clients.
    pub identity_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<Uuid>,
    pub permissions: Vec<String>,
    pub method: AuthMethod,
}

impl AuthContext {
    /// Context for a live identity authenticated by bearer token.
    #[must_use]
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            identity_id: identity.id,
            email: Some(identity.email.clone()),
            role: identity.role,
            clinic_id: identity.clinic_id,
            permissions: identity.effective_permissions(),
            method: AuthMethod::Bearer,
        }
    }

    /// Synthetic API-client principal for an API key.
    #[must_use]
    pub fn from_api_key(key: &ApiKey) -> Self {
        Self {
            identity_id: key.id,
            email: None,
            role: Role::ApiClient,
            clinic_id: None,
            permissions: key.effective_permissions(),
            method: AuthMethod::ApiKey {
                key_id: key.id,
                name: key.name.clone(),
                rate_limit: key.rate_limit,
            },
        }
    }

    /// Returns `true` if the permission set grants `permission`.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        permissions_allow(&self.permissions, permission)
    }

    /// Fails with `PERMISSION_DENIED` unless `permission` is granted.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::PermissionDenied`.
    pub fn require_permission(&self, permission: &str) -> AuthResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::debug!(
                identity_id = %self.identity_id,
                role = %self.role,
                permission = %permission,
                "Permission denied"
            );
            Err(AuthError::permission_denied(permission))
        }
    }

    /// Fails with `INSUFFICIENT_PERMISSIONS` unless the role is in `allowed`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InsufficientPermissions`.
    pub fn require_role(&self, allowed: &[Role]) -> AuthResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::insufficient_permissions(
                allowed.iter().map(|r| r.as_str()),
            ))
        }
    }

    #[must_use]
    pub fn is_api_client(&self) -> bool {
        matches!(self.method, AuthMethod::ApiKey { .. })
    }

    /// Request budget set on the API key, if any.
    #[must_use]
    pub fn rate_limit_override(&self) -> Option<u32> {
        match &self.method {
            AuthMethod::ApiKey { rate_limit, .. } => *rate_limit,
            AuthMethod::Bearer => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn api_key(permissions: Option<Vec<String>>) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            name: "Twilio webhook".to_string(),
            key_hash: ApiKey::hash_secret("sk_live_test"),
            key_prefix: ApiKey::display_prefix("sk_live_test"),
            permissions,
            rate_limit: Some(50),
            active: true,
            expires_at: None,
            rotated_from: None,
            created_by: None,
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            revoke_reason: None,
        }
    }

    #[test]
    fn test_identity_context() {
        let identity = Identity::new("s@example.com", Role::Staff);
        let ctx = AuthContext::from_identity(&identity);
        assert_eq!(ctx.identity_id, identity.id);
        assert!(ctx.has_permission("read:appointments"));
        assert!(!ctx.is_api_client());
        assert_eq!(ctx.rate_limit_override(), None);
    }

    #[test]
    fn test_api_key_context_defaults() {
        let key = api_key(None);
        let ctx = AuthContext::from_api_key(&key);
        assert_eq!(ctx.role, Role::ApiClient);
        assert_eq!(ctx.identity_id, key.id);
        assert!(ctx.has_permission("webhook:receive"));
        assert!(ctx.is_api_client());
        assert_eq!(ctx.rate_limit_override(), Some(50));
    }

    #[test]
    fn test_api_key_context_uses_key_permissions() {
        let ctx = AuthContext::from_api_key(&api_key(Some(vec!["read:appointments".into()])));
        assert!(ctx.has_permission("read:appointments"));
        assert!(!ctx.has_permission("webhook:receive"));
    }

    #[test]
    fn test_require_permission() {
        let ctx = AuthContext::from_identity(&Identity::new("p@example.com", Role::Patient));
        assert!(ctx.require_permission("read:own_data").is_ok());
        let err = ctx.require_permission("read:patients").unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }

    #[test]
    fn test_require_role() {
        let ctx = AuthContext::from_identity(&Identity::new("d@example.com", Role::Doctor));
        assert!(ctx.require_role(&[Role::Doctor, Role::Staff]).is_ok());
        let err = ctx.require_role(&Role::ADMINISTRATORS).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_PERMISSIONS");
    }
}
