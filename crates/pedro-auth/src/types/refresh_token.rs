//! Refresh token record.
//!
//! Refresh tokens are signed JWTs; this record tracks each issued token by
//! the SHA-256 hash of its encoded form so that it can be consumed exactly
//! once and revoked in bulk when the owner's password changes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::sha256_hex;

/// Issued refresh token as persisted in the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,

    pub user_id: Uuid,

    /// SHA-256 hash of the encoded token. The token itself is never stored.
    pub token_hash: String,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RefreshTokenRecord {
    /// Creates a record for a freshly issued token.
    #[must_use]
    pub fn new(user_id: Uuid, token: &str, expires_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: Self::hash_token(token),
            created_at: OffsetDateTime::now_utc(),
            expires_at,
            revoked_at: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Hash a token value using SHA-256.
    #[must_use]
    pub fn hash_token(token: &str) -> String {
        sha256_hex(token)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Returns `true` if the record is neither revoked nor expired at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_new_hashes_token() {
        let record = RefreshTokenRecord::new(
            Uuid::new_v4(),
            "eyJ.refresh.token",
            OffsetDateTime::now_utc() + Duration::days(7),
        );
        assert_eq!(
            record.token_hash,
            RefreshTokenRecord::hash_token("eyJ.refresh.token")
        );
        assert_ne!(record.token_hash, "eyJ.refresh.token");
    }

    #[test]
    fn test_validity() {
        let now = OffsetDateTime::now_utc();
        let mut record = RefreshTokenRecord::new(Uuid::new_v4(), "t", now + Duration::hours(1));
        assert!(record.is_valid_at(now));
        assert!(!record.is_valid_at(now + Duration::hours(2)));

        record.revoked_at = Some(now);
        assert!(!record.is_valid_at(now));
    }
}
