//! Axum authentication extractors and request guards.
//!
//! - [`BearerAuth`], [`ApiKeyAuth`] and [`FlexibleAuth`] resolve the request
//!   principal into an [`AuthContext`].
//! - [`RequirePermission`], [`RequireRole`] and [`OwnedResource`] gate a
//!   handler on that context.
//!
//! All rejections are [`crate::AuthError`], which renders as a JSON
//! `{error, code}` body (see [`error`]).

pub mod auth;
pub mod context;
pub mod error;
pub mod guard;

pub use auth::{
    API_KEY_HEADER, API_KEY_QUERY_PARAM, ApiCall, ApiKeyAuth, AuthState, BearerAuth, FlexibleAuth,
    api_key_from_parts, bearer_token,
};
pub use context::{AuthContext, AuthMethod};
pub use error::AUTH_REALM;
pub use guard::{
    Administrators, AppointmentResource, BillingResource, OwnedResource, PatientResource,
    PermissionSpec, RequirePermission, RequireRole, ResourceSpec, RoleSpec,
};
