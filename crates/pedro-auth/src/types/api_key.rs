//! API key domain types.
//!
//! # Security
//!
//! - Only a SHA-256 hash of the secret is stored; lookup is by hash
//! - The plaintext secret is returned exactly once, at creation
//! - Keys are revoked by deactivation, never deleted, so usage rows keep
//!   their foreign key

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::permission::default_permissions;
use crate::role::Role;

use super::sha256_hex;

/// Prefix of every generated API key secret.
pub const SECRET_PREFIX: &str = "sk_live_";

/// Number of leading secret characters kept for display.
const DISPLAY_PREFIX_LEN: usize = 12;

/// API key record stored in the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,

    /// Human-readable label.
    pub name: String,

    /// SHA-256 hash of the secret.
    #[serde(skip_serializing)]
    pub key_hash: String,

    /// First characters of the secret followed by `...`, for display.
    pub key_prefix: String,

    /// Explicit grant list. `None` means the API-client role default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,

    /// Requests per rate-limit window. `None` means the API-client role default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    pub active: bool,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,

    /// Key this one replaced, when created by rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<Uuid>,

    /// Administrator who created the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
}

impl ApiKey {
    /// Hash an API key secret for storage and lookup.
    ///
    /// Deterministic: the same secret always yields the same hash, so a key
    /// can be found by hashing what the caller presents.
    #[must_use]
    pub fn hash_secret(secret: &str) -> String {
        sha256_hex(secret)
    }

    /// Generate a new secret: `sk_live_` followed by 32 random bytes in hex.
    #[must_use]
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        format!("{SECRET_PREFIX}{}", hex::encode(bytes))
    }

    /// Display form of a secret: its first 12 characters and `...`.
    #[must_use]
    pub fn display_prefix(secret: &str) -> String {
        let head: String = secret.chars().take(DISPLAY_PREFIX_LEN).collect();
        format!("{head}...")
    }

    /// Returns `true` if the key has an expiry at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Returns `true` if the key is active and unexpired.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.active && !self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// The key's grant list, or the API-client default when unset or empty.
    #[must_use]
    pub fn effective_permissions(&self) -> Vec<String> {
        match &self.permissions {
            Some(list) if !list.is_empty() => list.clone(),
            _ => default_permissions(Role::ApiClient),
        }
    }
}

/// One authenticated API-key call, recorded for audit and quota accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyUsage {
    pub api_key_id: Uuid,
    pub endpoint: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn key(expires_at: Option<OffsetDateTime>, active: bool) -> ApiKey {
        let secret = ApiKey::generate_secret();
        ApiKey {
            id: Uuid::new_v4(),
            name: "Webhook".to_string(),
            key_hash: ApiKey::hash_secret(&secret),
            key_prefix: ApiKey::display_prefix(&secret),
            permissions: None,
            rate_limit: None,
            active,
            expires_at,
            rotated_from: None,
            created_by: None,
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            revoke_reason: None,
        }
    }

    #[test]
    fn test_generate_secret_format() {
        let secret = ApiKey::generate_secret();
        assert!(secret.starts_with(SECRET_PREFIX));
        assert_eq!(secret.len(), SECRET_PREFIX.len() + 64);
        assert!(secret[SECRET_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let secret = ApiKey::generate_secret();
        assert_eq!(ApiKey::hash_secret(&secret), ApiKey::hash_secret(&secret));
        assert_eq!(ApiKey::hash_secret(&secret).len(), 64);
    }

    #[test]
    fn test_distinct_secrets_do_not_collide() {
        let a = ApiKey::generate_secret();
        let b = ApiKey::generate_secret();
        assert_ne!(a, b);
        assert_ne!(ApiKey::hash_secret(&a), ApiKey::hash_secret(&b));
    }

    #[test]
    fn test_display_prefix() {
        assert_eq!(
            ApiKey::display_prefix("sk_live_0123456789abcdef"),
            "sk_live_0123..."
        );
    }

    #[test]
    fn test_expiry() {
        let now = OffsetDateTime::now_utc();
        assert!(!key(None, true).is_expired_at(now));
        assert!(!key(Some(now + Duration::days(1)), true).is_expired_at(now));
        assert!(key(Some(now - Duration::seconds(1)), true).is_expired_at(now));
    }

    #[test]
    fn test_is_usable() {
        let now = OffsetDateTime::now_utc();
        assert!(key(None, true).is_usable());
        assert!(!key(None, false).is_usable());
        assert!(!key(Some(now - Duration::hours(1)), true).is_usable());
    }

    #[test]
    fn test_effective_permissions_fallback() {
        let mut k = key(None, true);
        assert_eq!(
            k.effective_permissions(),
            vec!["read:public_data", "webhook:receive"]
        );
        k.permissions = Some(vec!["read:appointments".to_string()]);
        assert_eq!(k.effective_permissions(), vec!["read:appointments"]);
    }
}
