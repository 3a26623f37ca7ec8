//! Token codec: issuing and verifying signed access and refresh tokens.
//!
//! Tokens are HS256 JWTs signed with the configured secret and carrying a
//! fixed issuer and audience. Verification is stateless: signature, issuer,
//! audience and expiry are checked from the token alone. Liveness of the
//! identity and revocation of refresh tokens are checked by the callers
//! against the credential store.
//!
//! # Example
//!
//! ```ignore
//! let codec = TokenCodec::new(&config.token);
//! let pair = codec.issue(&identity)?;
//! let claims = codec.verify_access(&pair.access_token)?;
//! assert_eq!(claims.sub, identity.id.to_string());
//! ```

use std::time::Duration;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::error::AuthError;
use crate::role::Role;
use crate::types::Identity;

/// Value of the `type` claim on refresh tokens.
pub const REFRESH_MARKER: &str = "refresh";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer, audience, subject or marker claims are wrong.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims`.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Returns `true` if the token was well-formed and correctly signed but
    /// past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::TokenExpired,
            JwtError::EncodingError { message } => AuthError::internal(message),
            other => AuthError::token_invalid(other.to_string()),
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Identity id.
    pub sub: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<Uuid>,
    /// Permission snapshot at issue time. Informational only; requests are
    /// authorized against the live identity.
    pub permissions: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl AccessTokenClaims {
    /// Builds claims for `identity` expiring `ttl` from now.
    #[must_use]
    pub fn for_identity(identity: &Identity, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            sub: identity.id.to_string(),
            email: identity.email.clone(),
            role: identity.role,
            clinic_id: identity.clinic_id,
            permissions: identity.effective_permissions(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            exp: now.saturating_add(duration_secs(ttl)),
            iat: now,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Parses the subject as an identity id.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidClaims` if `sub` is not a UUID.
    pub fn identity_id(&self) -> Result<Uuid, JwtError> {
        parse_subject(&self.sub)
    }
}

/// Claims carried by a refresh token. No permission snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Identity id.
    pub sub: String,
    /// Always [`REFRESH_MARKER`].
    #[serde(rename = "type")]
    pub token_type: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    /// Makes two tokens issued in the same second distinct.
    pub jti: String,
}

impl RefreshTokenClaims {
    #[must_use]
    pub fn for_identity(identity_id: Uuid, issuer: &str, audience: &str, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            sub: identity_id.to_string(),
            token_type: REFRESH_MARKER.to_string(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            exp: now.saturating_add(duration_secs(ttl)),
            iat: now,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Parses the subject as an identity id.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidClaims` if `sub` is not a UUID.
    pub fn identity_id(&self) -> Result<Uuid, JwtError> {
        parse_subject(&self.sub)
    }

    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.exp).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

fn parse_subject(sub: &str) -> Result<Uuid, JwtError> {
    Uuid::parse_str(sub).map_err(|_| JwtError::invalid_claims("subject is not an identity id"))
}

fn duration_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

// ============================================================================
// Token Pair
// ============================================================================

/// Access and refresh token issued together.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    #[serde(skip)]
    pub refresh_claims: RefreshTokenClaims,
}

// ============================================================================
// Codec
// ============================================================================

/// Issues and verifies access and refresh tokens.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
}

impl TokenCodec {
    /// Creates a codec from token configuration.
    #[must_use]
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_lifetime: config.access_token_lifetime,
            refresh_token_lifetime: config.refresh_token_lifetime,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Issues an access/refresh pair for `identity`.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::EncodingError` if signing fails.
    pub fn issue(&self, identity: &Identity) -> Result<TokenPair, JwtError> {
        let access = AccessTokenClaims::for_identity(
            identity,
            &self.issuer,
            &self.audience,
            self.access_token_lifetime,
        );
        let refresh = RefreshTokenClaims::for_identity(
            identity.id,
            &self.issuer,
            &self.audience,
            self.refresh_token_lifetime,
        );

        Ok(TokenPair {
            access_token: self.encode(&access)?,
            refresh_token: self.encode(&refresh)?,
            token_type: "Bearer",
            expires_in: self.access_token_lifetime.as_secs(),
            refresh_claims: refresh,
        })
    }

    /// Signs arbitrary claims with this codec's key.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::EncodingError` if serialization or signing fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Verifies an access token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Expired` for an otherwise valid but expired token,
    /// and another `JwtError` for any signature, issuer, audience or shape
    /// failure.
    pub fn verify_access(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        let claims: AccessTokenClaims = self.decode(token)?;
        claims.identity_id()?;
        Ok(claims)
    }

    /// Verifies a refresh token and returns its claims.
    ///
    /// # Errors
    ///
    /// As [`Self::verify_access`], plus `JwtError::InvalidClaims` if the
    /// token does not carry the refresh marker.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshTokenClaims, JwtError> {
        let claims: RefreshTokenClaims = self.decode(token)?;
        if claims.token_type != REFRESH_MARKER {
            return Err(JwtError::invalid_claims("not a refresh token"));
        }
        claims.identity_id()?;
        Ok(claims)
    }

    fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = true;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(JwtError::from)
    }
}
