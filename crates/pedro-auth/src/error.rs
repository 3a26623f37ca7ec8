//! Authentication and authorization error types.
//!
//! Every failure the authorization layer can produce is a variant of
//! [`AuthError`]. Each variant maps to exactly one HTTP status and one stable
//! `code` string (see [`AuthError::status`] and [`AuthError::code`]); the
//! HTTP rendering lives in [`crate::middleware::error`].

use std::fmt;

use axum::http::StatusCode;

/// Errors that can occur during authentication and authorization.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Neither an `Authorization` header nor an API key was presented.
    #[error("No authorization header provided")]
    AuthHeaderMissing,

    /// The `Authorization` header is not of the form `Bearer <token>`.
    #[error("Invalid authorization format. Use: Bearer <token>")]
    AuthFormatInvalid,

    /// The bearer token decoded correctly but its expiry is in the past.
    #[error("Token has expired")]
    TokenExpired,

    /// The bearer token failed signature, issuer, audience or shape checks.
    #[error("Invalid token")]
    TokenInvalid {
        /// Internal detail, logged but never returned to the caller.
        message: String,
    },

    /// The token subject no longer exists in the credential store.
    #[error("User not found")]
    UserNotFound,

    /// The token subject exists but has been deactivated.
    #[error("User account is deactivated")]
    UserDeactivated,

    /// API-key authentication was required but no key was presented.
    #[error("API key required")]
    ApiKeyMissing,

    /// No API key matches the presented secret.
    #[error("Invalid API key")]
    ApiKeyInvalid,

    /// The API key exists but is inactive or past its expiry.
    #[error("API key is deactivated")]
    ApiKeyDeactivated,

    /// No API key has the requested id (administration endpoints only).
    #[error("API key not found")]
    ApiKeyNotFound,

    /// The caller's role is not in the set allowed for the operation.
    #[error("Insufficient permissions")]
    InsufficientPermissions {
        /// Roles that would have been accepted.
        required: Vec<String>,
    },

    /// The caller's permission set does not grant the capability.
    #[error("Permission denied")]
    PermissionDenied {
        /// The capability string that was checked.
        permission: String,
    },

    /// The caller may not act on this specific resource instance.
    #[error("Access denied to this resource")]
    ResourceAccessDenied {
        /// Resource type that was checked.
        resource_type: String,
    },

    /// An ownership-guarded route was called without a resource id.
    #[error("Resource ID required")]
    ResourceIdMissing {
        /// Resource type that was being guarded.
        resource_type: String,
    },

    /// Authentication could not be completed (e.g. identity store timeout).
    #[error("Authentication failed")]
    AuthFailed {
        /// Internal detail, logged but never returned to the caller.
        message: String,
    },

    /// Email/password login did not match an active account.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The request body or parameters are invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The caller exhausted its request budget for the current window.
    #[error("Too many requests")]
    RateLimited {
        /// Seconds until the current window resets.
        retry_after_secs: u64,
    },

    /// An error occurred while storing or retrieving auth data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `TokenInvalid` error.
    #[must_use]
    pub fn token_invalid(message: impl Into<String>) -> Self {
        Self::TokenInvalid {
            message: message.into(),
        }
    }

    /// Creates a new `InsufficientPermissions` error.
    #[must_use]
    pub fn insufficient_permissions<I, R>(required: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::InsufficientPermissions {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a new `PermissionDenied` error.
    #[must_use]
    pub fn permission_denied(permission: impl Into<String>) -> Self {
        Self::PermissionDenied {
            permission: permission.into(),
        }
    }

    /// Creates a new `ResourceAccessDenied` error.
    #[must_use]
    pub fn resource_access_denied(resource_type: impl Into<String>) -> Self {
        Self::ResourceAccessDenied {
            resource_type: resource_type.into(),
        }
    }

    /// Creates a new `ResourceIdMissing` error.
    #[must_use]
    pub fn resource_id_missing(resource_type: impl Into<String>) -> Self {
        Self::ResourceIdMissing {
            resource_type: resource_type.into(),
        }
    }

    /// Creates a new `AuthFailed` error.
    #[must_use]
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status this error is rendered with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthHeaderMissing
            | Self::AuthFormatInvalid
            | Self::TokenExpired
            | Self::TokenInvalid { .. }
            | Self::UserNotFound
            | Self::UserDeactivated
            | Self::ApiKeyMissing
            | Self::ApiKeyInvalid
            | Self::ApiKeyDeactivated
            | Self::AuthFailed { .. }
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions { .. }
            | Self::PermissionDenied { .. }
            | Self::ResourceAccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::ResourceIdMissing { .. } | Self::InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::ApiKeyNotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code returned in the `code` field.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthHeaderMissing => "AUTH_HEADER_MISSING",
            Self::AuthFormatInvalid => "AUTH_FORMAT_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid { .. } => "TOKEN_INVALID",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::UserDeactivated => "USER_DEACTIVATED",
            Self::ApiKeyMissing => "API_KEY_MISSING",
            Self::ApiKeyInvalid => "API_KEY_INVALID",
            Self::ApiKeyDeactivated => "API_KEY_DEACTIVATED",
            Self::ApiKeyNotFound => "API_KEY_NOT_FOUND",
            Self::InsufficientPermissions { .. } => "INSUFFICIENT_PERMISSIONS",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ResourceAccessDenied { .. } => "RESOURCE_ACCESS_DENIED",
            Self::ResourceIdMissing { .. } => "RESOURCE_ID_MISSING",
            Self::AuthFailed { .. } => "AUTH_FAILED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Server-side failures collapse to a generic message so store internals
    /// never leave the process.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// Returns `true` if this is a token-related error.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(self, Self::TokenInvalid { .. } | Self::TokenExpired)
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthHeaderMissing
            | Self::AuthFormatInvalid
            | Self::ResourceIdMissing { .. }
            | Self::InvalidRequest { .. }
            | Self::ApiKeyNotFound => ErrorCategory::MalformedRequest,
            Self::TokenExpired
            | Self::TokenInvalid { .. }
            | Self::UserNotFound
            | Self::UserDeactivated
            | Self::ApiKeyMissing
            | Self::ApiKeyInvalid
            | Self::ApiKeyDeactivated
            | Self::AuthFailed { .. }
            | Self::InvalidCredentials => ErrorCategory::InvalidCredential,
            Self::InsufficientPermissions { .. }
            | Self::PermissionDenied { .. }
            | Self::ResourceAccessDenied { .. }
            | Self::RateLimited { .. } => ErrorCategory::Forbidden,
            Self::Storage { .. } => ErrorCategory::Store,
            Self::Configuration { .. } | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of authentication/authorization errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or unparseable credential material.
    MalformedRequest,
    /// Signature, expiry or lookup failure.
    InvalidCredential,
    /// Authenticated but not allowed.
    Forbidden,
    /// Downstream store failure.
    Store,
    /// Unexpected internal failure.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRequest => write!(f, "malformed_request"),
            Self::InvalidCredential => write!(f, "invalid_credential"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::Store => write!(f, "store"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
