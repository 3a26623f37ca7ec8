//! # pedro-auth
//!
//! Authorization and session security for the Pedro Dental API.
//!
//! This crate provides:
//! - Bearer token and API key authentication resolving to one request context
//! - Role-based permissions with `action:*` and `*:resource` wildcards
//! - Per-instance ownership checks for patient, appointment and billing records
//! - Server-side sessions with fixed-age id regeneration
//! - Role-scoped rate-limit budgets
//! - Asynchronous, redacted audit logging
//!
//! ## Modules
//!
//! - [`config`] - Authentication configuration
//! - [`error`] - Error taxonomy and its HTTP rendering
//! - [`role`] / [`permission`] - Role table and permission resolution
//! - [`token`] - Token codec, password policy and token lifecycle
//! - [`middleware`] - Authentication extractors and authorization guards
//! - [`ownership`] - Resource ownership guard
//! - [`session`] - Session manager and middleware
//! - [`rate_limit`] - Per-role request budgets
//! - [`audit`] - Audit logger and middleware
//! - [`api_key`] - API key lifecycle
//! - [`storage`] - Storage traits and the in-memory store
//! - [`http`] - Axum handlers for the authentication API

pub mod api_key;
pub mod audit;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod ownership;
pub mod permission;
pub mod rate_limit;
pub mod role;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

pub use api_key::{ApiKeyManager, IssuedApiKey, NewApiKey};
pub use audit::{AuditLogger, AuditRecord, AuditScope, RequestMeta, audit_middleware};
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use middleware::{
    ApiKeyAuth, AuthContext, AuthMethod, AuthState, BearerAuth, FlexibleAuth, OwnedResource,
    RequirePermission, RequireRole,
};
pub use ownership::{OwnershipGuard, ResourceOwner, ResourceType};
pub use rate_limit::{RateLimit, RateLimitPolicy};
pub use role::Role;
pub use session::{CurrentSession, Session, SessionData, SessionManager, session_middleware};
pub use storage::{
    ApiKeyStorage, AuditStorage, MemoryStore, RefreshTokenStorage, ResourceOwnerStorage,
    SessionStore, UserStorage,
};
pub use token::{TokenCodec, TokenPair, TokenService};
pub use types::{ApiKey, ApiKeyUsage, Identity, RefreshTokenRecord};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use pedro_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::api_key::ApiKeyManager;
    pub use crate::audit::{AuditLogger, RequestMeta};
    pub use crate::config::AuthConfig;
    pub use crate::error::AuthError;
    pub use crate::middleware::{
        Administrators, AppointmentResource, AuthContext, AuthState, BearerAuth,
        BillingResource, FlexibleAuth, OwnedResource, PatientResource, RequirePermission,
        RequireRole,
    };
    pub use crate::ownership::{OwnershipGuard, ResourceType};
    pub use crate::rate_limit::RateLimitPolicy;
    pub use crate::role::Role;
    pub use crate::session::SessionManager;
    pub use crate::token::{TokenCodec, TokenService};
    pub use crate::{permission_spec, role_spec};
}
