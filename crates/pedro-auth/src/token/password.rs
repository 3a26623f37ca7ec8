//! Password hashing and strength policy.
//!
//! Hashes are Argon2id PHC strings with a random salt per hash.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::AuthResult;
use crate::config::PasswordConfig;
use crate::error::AuthError;

/// Characters accepted as the required special character.
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Hashes a password for storage.
///
/// # Errors
///
/// Returns an `Internal` error if hashing fails.
pub fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::internal(format!("password hashing failed: {e}")))
}

/// Checks a password against a stored hash.
///
/// An unparseable stored hash never matches.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is not a valid PHC string");
            false
        }
    }
}

/// Enforces the password strength policy.
///
/// # Errors
///
/// Returns `INVALID_REQUEST` naming the first rule the password breaks.
pub fn validate_password(password: &str, policy: &PasswordConfig) -> AuthResult<()> {
    if password.chars().count() < policy.min_length {
        return Err(AuthError::invalid_request(format!(
            "Password must be at least {} characters long",
            policy.min_length
        )));
    }

    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    if !has_upper || !has_lower {
        return Err(AuthError::invalid_request(
            "Password must contain both uppercase and lowercase letters",
        ));
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AuthError::invalid_request(
            "Password must contain at least one number",
        ));
    }

    if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        return Err(AuthError::invalid_request(
            "Password must contain at least one special character",
        ));
    }

    Ok(())
}
