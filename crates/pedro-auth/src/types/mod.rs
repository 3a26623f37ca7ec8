//! Domain types shared by the storage traits and the request pipeline.

pub mod api_key;
pub mod identity;
pub mod refresh_token;

pub use api_key::{ApiKey, ApiKeyUsage};
pub use identity::Identity;
pub use refresh_token::RefreshTokenRecord;

/// SHA-256 of `value`, hex-encoded.
///
/// Used for refresh tokens and API key secrets; the plaintext is never
/// persisted.
#[must_use]
pub fn sha256_hex(value: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
