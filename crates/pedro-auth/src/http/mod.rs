//! HTTP handlers for the authentication API.
//!
//! - [`auth`]: login, refresh, logout, password change and `/me`
//! - [`api_keys`]: API key administration
//! - [`resources`]: guarded resource lookups
//!
//! [`router`] mounts all of them on any state that exposes the services via
//! `FromRef`:
//!
//! ```ignore
//! let app = pedro_auth::http::router().with_state(app_state);
//! ```

pub mod api_keys;
pub mod auth;
pub mod resources;

use axum::{
    Json, Router,
    extract::{FromRef, rejection::JsonRejection},
    routing::{delete, get, post},
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::AuthResult;
use crate::api_key::ApiKeyManager;
use crate::error::AuthError;
use crate::middleware::{AppointmentResource, AuthState, BillingResource, PatientResource};
use crate::ownership::OwnershipGuard;
use crate::session::SessionManager;
use crate::token::TokenService;

pub use api_keys::{create_api_key_handler, revoke_api_key_handler, rotate_api_key_handler};
pub use auth::{
    change_password_handler, login_handler, logout_handler, me_handler, refresh_handler,
};
pub use resources::{ReadResource, resource_handler};

/// Routes of the authentication API.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    AuthState: FromRef<S>,
    TokenService: FromRef<S>,
    SessionManager: FromRef<S>,
    ApiKeyManager: FromRef<S>,
    OwnershipGuard: FromRef<S>,
{
    Router::new()
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/refresh", post(refresh_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/change-password", post(change_password_handler))
        .route("/api/auth/me", get(me_handler))
        .route("/api/api-keys", post(create_api_key_handler))
        .route("/api/api-keys/{id}", delete(revoke_api_key_handler))
        .route("/api/api-keys/{id}/rotate", post(rotate_api_key_handler))
        .route("/api/patients/{id}", get(resource_handler::<PatientResource>))
        .route(
            "/api/appointments/{id}",
            get(resource_handler::<AppointmentResource>),
        )
        .route("/api/billing/{id}", get(resource_handler::<BillingResource>))
}

/// `{ "success": true, "message": ... }`
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

impl MessageResponse {
    #[must_use]
    pub fn ok(message: &'static str) -> Self {
        Self {
            success: true,
            message,
        }
    }
}

/// Unwraps a JSON body, turning axum's rejection into `INVALID_REQUEST`.
pub(crate) fn json_body<T: DeserializeOwned>(
    payload: Result<Json<T>, JsonRejection>,
) -> AuthResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected request body");
        AuthError::invalid_request(rejection.body_text())
    })
}
