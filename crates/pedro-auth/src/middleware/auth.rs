//! Request authentication.
//!
//! Two mutually exclusive credential modes resolve a request to one
//! [`AuthContext`]:
//!
//! - **Bearer token**: `Authorization: Bearer <access token>`. The token is
//!   verified, then the identity is re-read from the store; its live role,
//!   active flag and permissions win over anything embedded in the token.
//! - **API key**: `X-API-Key` header or `api_key` query parameter. The key is
//!   hashed and looked up; the request runs as a synthetic API-client
//!   principal with the key's own permissions.
//!
//! [`FlexibleAuth`] tries the API key path when key material is present and
//! the bearer path otherwise; it never attempts both.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use pedro_auth::middleware::{AuthState, BearerAuth};
//!
//! async fn me(BearerAuth(auth): BearerAuth) -> String {
//!     auth.identity_id.to_string()
//! }
//!
//! let app = Router::new().route("/me", get(me)).with_state(auth_state);
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::audit::{AuditScope, RequestMeta};
use crate::error::AuthError;
use crate::storage::{ApiKeyStorage, UserStorage};
use crate::token::TokenCodec;
use crate::types::{ApiKey, ApiKeyUsage};

use super::context::AuthContext;

/// Header carrying an API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Query parameter carrying an API key.
pub const API_KEY_QUERY_PARAM: &str = "api_key";

// =============================================================================
// Auth State
// =============================================================================

/// State required by the authentication extractors.
///
/// Include it in the application state and expose it with `FromRef`.
#[derive(Clone)]
pub struct AuthState {
    /// Verifies access tokens.
    pub codec: Arc<TokenCodec>,

    /// Live identity lookups.
    pub users: Arc<dyn UserStorage>,

    /// API key lookups and usage log.
    pub api_keys: Arc<dyn ApiKeyStorage>,

    /// Upper bound on each store call.
    pub store_timeout: Duration,
}

impl AuthState {
    /// Creates a new auth state with a 5 second store timeout.
    pub fn new(
        codec: Arc<TokenCodec>,
        users: Arc<dyn UserStorage>,
        api_keys: Arc<dyn ApiKeyStorage>,
    ) -> Self {
        Self {
            codec,
            users,
            api_keys,
            store_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Authenticates a bearer token from request headers.
    ///
    /// # Errors
    ///
    /// `AUTH_HEADER_MISSING`, `AUTH_FORMAT_INVALID`, `TOKEN_EXPIRED`,
    /// `TOKEN_INVALID`, `USER_NOT_FOUND`, `USER_DEACTIVATED`, `AUTH_FAILED` on
    /// identity store timeout, or `Storage` on identity store failure.
    pub async fn authenticate_bearer(&self, headers: &HeaderMap) -> AuthResult<AuthContext> {
        // 1. Extract the token
        let token = bearer_token(headers)?;

        // 2. Verify signature, issuer, audience and expiry
        let claims = self.codec.verify_access(token).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AuthError::from(e)
        })?;
        let identity_id = claims.identity_id()?;

        // 3. Re-read the identity; the token's role is not current truth
        let identity = self
            .bounded("identity", self.users.find_by_id(identity_id))
            .await?
            .ok_or_else(|| {
                tracing::debug!(user_id = %identity_id, "Token subject not found");
                AuthError::UserNotFound
            })?;

        // 4. Reject deactivated identities
        if !identity.active {
            tracing::warn!(user_id = %identity_id, "Deactivated user presented a valid token");
            return Err(AuthError::UserDeactivated);
        }

        let ctx = AuthContext::from_identity(&identity);
        tracing::debug!(
            user_id = %ctx.identity_id,
            role = %ctx.role,
            "Bearer token authenticated"
        );
        Ok(ctx)
    }

    /// Authenticates an API key secret and records the call.
    ///
    /// # Errors
    ///
    /// `API_KEY_INVALID`, `API_KEY_DEACTIVATED` (inactive or expired),
    /// `AUTH_FAILED` on store timeout, or `Storage` on store failure.
    pub async fn authenticate_api_key(
        &self,
        secret: &str,
        call: ApiCall,
    ) -> AuthResult<AuthContext> {
        // 1. Look up by hash
        let key_hash = ApiKey::hash_secret(secret);
        let key = self
            .bounded("api key", self.api_keys.find_by_hash(&key_hash))
            .await?
            .ok_or(AuthError::ApiKeyInvalid)?;

        // 2. Reject inactive or expired keys
        if !key.is_usable() {
            tracing::warn!(api_key_id = %key.id, "Deactivated API key presented");
            return Err(AuthError::ApiKeyDeactivated);
        }

        // 3. Record usage off the request path
        let usage = ApiKeyUsage {
            api_key_id: key.id,
            endpoint: call.endpoint,
            method: call.method,
            ip_address: call.meta.ip_address,
            user_agent: call.meta.user_agent,
            created_at: OffsetDateTime::now_utc(),
        };
        let api_keys = self.api_keys.clone();
        tokio::spawn(async move {
            if let Err(e) = api_keys.record_usage(&usage).await {
                tracing::error!(
                    error = %e,
                    api_key_id = %usage.api_key_id,
                    "Failed to record API key usage"
                );
            }
        });

        let ctx = AuthContext::from_api_key(&key);
        tracing::debug!(api_key_id = %key.id, name = %key.name, "API key authenticated");
        Ok(ctx)
    }

    /// Authenticates by API key when key material is present, by bearer
    /// token otherwise.
    ///
    /// # Errors
    ///
    /// Any error of [`Self::authenticate_api_key`] or
    /// [`Self::authenticate_bearer`], depending on the path taken.
    pub async fn authenticate(&self, parts: &Parts) -> AuthResult<AuthContext> {
        match api_key_from_parts(parts) {
            Some(secret) => {
                self.authenticate_api_key(&secret, ApiCall::from_parts(parts))
                    .await
            }
            None => self.authenticate_bearer(&parts.headers).await,
        }
    }

    /// Runs a credential store call under the store timeout. A timeout is an
    /// authentication failure, never a pass.
    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = AuthResult<T>>,
    ) -> AuthResult<T> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(error = %e, lookup = what, "Credential store lookup failed");
                Err(e)
            }
            Err(_) => {
                tracing::error!(lookup = what, "Credential store lookup timed out");
                Err(AuthError::auth_failed(format!("{what} lookup timed out")))
            }
        }
    }
}

/// Request details recorded with API key usage.
#[derive(Debug, Clone, Default)]
pub struct ApiCall {
    pub endpoint: String,
    pub method: String,
    pub meta: RequestMeta,
}

impl ApiCall {
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            endpoint: parts.uri.path().to_string(),
            method: parts.method.to_string(),
            meta: RequestMeta::from_parts(parts),
        }
    }
}

/// Parses `Authorization: Bearer <token>`.
///
/// # Errors
///
/// `AUTH_HEADER_MISSING` without the header, `AUTH_FORMAT_INVALID` for any
/// other scheme, an empty token, a token containing whitespace, or a
/// non-UTF-8 value.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::AuthHeaderMissing)?
        .to_str()
        .map_err(|_| AuthError::AuthFormatInvalid)?;

    match value.split_once(' ').map(|(scheme, token)| (scheme, token.trim())) {
        Some(("Bearer", token))
            if !token.is_empty() && !token.contains(char::is_whitespace) =>
        {
            Ok(token)
        }
        _ => Err(AuthError::AuthFormatInvalid),
    }
}

#[derive(Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

/// API key from the `X-API-Key` header, else the `api_key` query parameter.
#[must_use]
pub fn api_key_from_parts(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            Query::<ApiKeyQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.api_key)
        })
        .filter(|k| !k.is_empty())
}

/// Stores a resolved context on the request so later extractors reuse it,
/// and tells the audit scope who the principal is.
fn remember(parts: &mut Parts, ctx: &AuthContext) {
    if let Some(scope) = parts.extensions.get::<AuditScope>() {
        scope.set_principal(ctx);
    }
    parts.extensions.insert(ctx.clone());
}

// =============================================================================
// Extractors
// =============================================================================

/// Extractor requiring a valid bearer token.
///
/// # Errors
///
/// Rejects with the `AuthError` of [`AuthState::authenticate_bearer`].
pub struct BearerAuth(pub AuthContext);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>()
            && !ctx.is_api_client()
        {
            return Ok(BearerAuth(ctx.clone()));
        }

        let auth_state = AuthState::from_ref(state);
        let ctx = auth_state.authenticate_bearer(&parts.headers).await?;
        remember(parts, &ctx);
        Ok(BearerAuth(ctx))
    }
}

/// Extractor requiring a valid API key.
///
/// # Errors
///
/// Rejects with `API_KEY_MISSING` when no key is presented, otherwise with
/// the `AuthError` of [`AuthState::authenticate_api_key`].
pub struct ApiKeyAuth(pub AuthContext);

impl<S> FromRequestParts<S> for ApiKeyAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>()
            && ctx.is_api_client()
        {
            return Ok(ApiKeyAuth(ctx.clone()));
        }

        let secret = api_key_from_parts(parts).ok_or(AuthError::ApiKeyMissing)?;
        let auth_state = AuthState::from_ref(state);
        let ctx = auth_state
            .authenticate_api_key(&secret, ApiCall::from_parts(parts))
            .await?;
        remember(parts, &ctx);
        Ok(ApiKeyAuth(ctx))
    }
}

/// Extractor accepting either an API key or a bearer token.
///
/// # Errors
///
/// Rejects with the `AuthError` of [`AuthState::authenticate`].
pub struct FlexibleAuth(pub AuthContext);

impl<S> FromRequestParts<S> for FlexibleAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            return Ok(FlexibleAuth(ctx.clone()));
        }

        let auth_state = AuthState::from_ref(state);
        let ctx = auth_state.authenticate(parts).await?;
        remember(parts, &ctx);
        Ok(FlexibleAuth(ctx))
    }
}
