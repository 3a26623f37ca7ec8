//! Token lifecycle service.
//!
//! Handles the credential flows around the codec:
//!
//! - Password login
//! - Refresh token rotation
//! - Logout (revokes all refresh tokens of the identity)
//! - Password change (revokes all refresh tokens of the identity)
//!
//! # Usage
//!
//! ```ignore
//! use pedro_auth::token::TokenService;
//!
//! let service = TokenService::new(codec, users, refresh_tokens, config.password.clone());
//! let login = service.login("dr@clinic.example", "S3cret!pass", &meta).await?;
//! let rotated = service.refresh(&login.tokens.refresh_token, &meta).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::audit::RequestMeta;
use crate::config::PasswordConfig;
use crate::error::AuthError;
use crate::storage::{RefreshTokenStorage, UserStorage};
use crate::token::jwt::{TokenCodec, TokenPair};
use crate::token::password::{hash_password, validate_password, verify_password};
use crate::types::{Identity, RefreshTokenRecord};

/// Result of a successful login or refresh.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub identity: Identity,
    pub tokens: TokenPair,
}

/// Service for issuing, rotating and revoking tokens.
#[derive(Clone)]
pub struct TokenService {
    /// Signs and verifies tokens.
    codec: Arc<TokenCodec>,

    /// Identity lookups and password updates.
    users: Arc<dyn UserStorage>,

    /// Issued refresh token records.
    refresh_tokens: Arc<dyn RefreshTokenStorage>,

    /// Strength policy for new passwords.
    password_policy: PasswordConfig,

    /// Upper bound on each store call.
    store_timeout: Duration,
}

impl TokenService {
    /// Creates a new token service with a 5 second store timeout.
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        users: Arc<dyn UserStorage>,
        refresh_tokens: Arc<dyn RefreshTokenStorage>,
        password_policy: PasswordConfig,
    ) -> Self {
        Self {
            codec,
            users,
            refresh_tokens,
            password_policy,
            store_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Authenticates by email and password and issues a token pair.
    ///
    /// # Errors
    ///
    /// - `INVALID_CREDENTIALS` for an unknown email or a wrong password
    /// - `USER_DEACTIVATED` for a deactivated account
    /// - `AUTH_FAILED` if the identity lookup times out
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: &RequestMeta,
    ) -> AuthResult<IssuedTokens> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::invalid_request("Email and password are required"));
        }

        // 1. Find the identity
        let email = email.trim().to_lowercase();
        let identity = self
            .bounded(self.users.find_by_email(&email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        // 2. Reject deactivated accounts
        if !identity.active {
            tracing::warn!(user_id = %identity.id, "Login attempt on deactivated account");
            return Err(AuthError::UserDeactivated);
        }

        // 3. Verify the password off the async runtime
        let Some(hash) = identity.password_hash.clone() else {
            return Err(AuthError::InvalidCredentials);
        };
        if !check_password(password, hash).await? {
            tracing::info!(user_id = %identity.id, ip = ?meta.ip_address, "Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        }

        // 4. Issue tokens and record the refresh token
        let tokens = self.issue(&identity, meta).await?;

        if let Err(e) = self
            .users
            .record_login(identity.id, OffsetDateTime::now_utc())
            .await
        {
            tracing::warn!(error = %e, user_id = %identity.id, "Failed to record login time");
        }

        tracing::info!(user_id = %identity.id, role = %identity.role, "User logged in");
        Ok(IssuedTokens { identity, tokens })
    }

    /// Exchanges a refresh token for a new token pair.
    ///
    /// The presented token is consumed: a second use, including a concurrent
    /// one, fails.
    ///
    /// # Errors
    ///
    /// - `TOKEN_EXPIRED` / `TOKEN_INVALID` if the token fails verification,
    ///   lacks the refresh marker, or was revoked or already used
    /// - `USER_NOT_FOUND` / `USER_DEACTIVATED` if the live identity is gone
    pub async fn refresh(&self, refresh_token: &str, meta: &RequestMeta) -> AuthResult<IssuedTokens> {
        // 1. Verify signature, claims and marker
        let claims = self.codec.verify_refresh(refresh_token)?;
        let identity_id = claims.identity_id()?;

        // 2. Consume the stored record
        let now = OffsetDateTime::now_utc();
        let token_hash = RefreshTokenRecord::hash_token(refresh_token);
        let record = self
            .bounded(self.refresh_tokens.consume(&token_hash, now))
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = %identity_id, "Refresh with revoked or unknown token");
                AuthError::token_invalid("refresh token revoked or already used")
            })?;

        if record.user_id != identity_id {
            tracing::error!(
                user_id = %identity_id,
                record_user_id = %record.user_id,
                "Refresh token record belongs to another identity"
            );
            return Err(AuthError::token_invalid("refresh token subject mismatch"));
        }

        // 3. Re-read the live identity
        let identity = self
            .bounded(self.users.find_by_id(identity_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !identity.active {
            return Err(AuthError::UserDeactivated);
        }

        // 4. Issue the rotated pair
        let tokens = self.issue(&identity, meta).await?;
        tracing::debug!(user_id = %identity.id, "Refresh token rotated");
        Ok(IssuedTokens { identity, tokens })
    }

    /// Revokes every outstanding refresh token of `identity_id`.
    ///
    /// Returns the number of tokens revoked.
    ///
    /// # Errors
    ///
    /// Returns a storage error if revocation fails.
    pub async fn logout(&self, identity_id: Uuid) -> AuthResult<u64> {
        let revoked = self
            .bounded(self.refresh_tokens.revoke_all_for_user(identity_id))
            .await?;
        tracing::info!(user_id = %identity_id, revoked, "User logged out");
        Ok(revoked)
    }

    /// Live identity record of `identity_id`.
    ///
    /// # Errors
    ///
    /// `USER_NOT_FOUND` if the identity is gone; `AUTH_FAILED` on timeout.
    pub async fn current_identity(&self, identity_id: Uuid) -> AuthResult<Identity> {
        self.bounded(self.users.find_by_id(identity_id))
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Replaces the password of `identity_id` and revokes all its refresh
    /// tokens.
    ///
    /// # Errors
    ///
    /// - `INVALID_REQUEST` if the new password breaks the policy or equals
    ///   the current one
    /// - `USER_NOT_FOUND` if the identity is gone
    /// - `INVALID_CREDENTIALS` if `current_password` is wrong
    pub async fn change_password(
        &self,
        identity_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(AuthError::invalid_request(
                "Current password and new password are required",
            ));
        }
        validate_password(new_password, &self.password_policy)?;
        if current_password == new_password {
            return Err(AuthError::invalid_request(
                "New password must be different from current password",
            ));
        }

        let identity = self
            .bounded(self.users.find_by_id(identity_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let Some(hash) = identity.password_hash else {
            return Err(AuthError::InvalidCredentials);
        };
        if !check_password(current_password, hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = {
            let new_password = new_password.to_string();
            tokio::task::spawn_blocking(move || hash_password(&new_password))
                .await
                .map_err(|e| AuthError::internal(format!("password hashing task failed: {e}")))??
        };
        self.bounded(self.users.update_password_hash(identity_id, &new_hash))
            .await?;

        let revoked = self
            .bounded(self.refresh_tokens.revoke_all_for_user(identity_id))
            .await?;
        tracing::info!(user_id = %identity_id, revoked, "Password changed");
        Ok(())
    }

    async fn issue(&self, identity: &Identity, meta: &RequestMeta) -> AuthResult<TokenPair> {
        let tokens = self.codec.issue(identity)?;

        let mut record = RefreshTokenRecord::new(
            identity.id,
            &tokens.refresh_token,
            tokens.refresh_claims.expires_at(),
        );
        record.ip_address = meta.ip_address.clone();
        record.user_agent = meta.user_agent.clone();
        self.bounded(self.refresh_tokens.create(&record)).await?;

        Ok(tokens)
    }

    async fn bounded<T>(&self, fut: impl Future<Output = AuthResult<T>>) -> AuthResult<T> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Credential store call timed out");
                Err(AuthError::auth_failed("credential store timed out"))
            }
        }
    }
}

async fn check_password(password: &str, hash: String) -> AuthResult<bool> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::internal(format!("password verification task failed: {e}")))
}
