//! Credential endpoints.
//!
//! - `POST /api/auth/login`: email + password → token pair and a fresh session
//! - `POST /api/auth/refresh`: one-time refresh token → rotated pair
//! - `POST /api/auth/logout`: revokes refresh tokens and ends the session
//! - `POST /api/auth/change-password`: replaces the password, revoking
//!   every refresh token
//! - `GET /api/auth/me`: the live identity and its permissions

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{AuditScope, RequestMeta};
use crate::error::AuthError;
use crate::middleware::{AuthContext, BearerAuth};
use crate::role::Role;
use crate::session::{CurrentSession, SessionManager};
use crate::token::{IssuedTokens, TokenService};
use crate::types::Identity;

use super::{MessageResponse, json_body};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// Public view of an identity. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic_id: Option<Uuid>,
    pub active: bool,
    pub permissions: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub last_login_at: Option<OffsetDateTime>,
}

impl From<&Identity> for UserView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            role: identity.role,
            clinic_id: identity.clinic_id,
            active: identity.active,
            permissions: identity.effective_permissions(),
            created_at: identity.created_at,
            last_login_at: identity.last_login_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub success: bool,
    pub token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserView>,
}

impl TokenResponse {
    fn new(issued: IssuedTokens, include_user: bool) -> Self {
        let user = include_user.then(|| UserView::from(&issued.identity));
        Self {
            success: true,
            token: issued.tokens.access_token,
            refresh_token: issued.tokens.refresh_token,
            token_type: issued.tokens.token_type,
            expires_in: issued.tokens.expires_in,
            user,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: UserView,
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /api/auth/login`
///
/// Issues a token pair and starts a session under a new id. The caller's
/// current session, if any, is destroyed first.
pub async fn login_handler(
    State(tokens): State<TokenService>,
    State(sessions): State<SessionManager>,
    scope: Option<Extension<AuditScope>>,
    current: Option<Extension<CurrentSession>>,
    meta: RequestMeta,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<TokenResponse>), AuthError> {
    let request = json_body(payload)?;
    let issued = tokens
        .login(&request.email, &request.password, &meta)
        .await?;

    if let Some(Extension(scope)) = scope {
        scope.set_principal(&AuthContext::from_identity(&issued.identity));
    }

    let previous = session_id(current, &jar, &sessions);
    let session = sessions
        .login(previous.as_deref(), &issued.identity, Map::new())
        .await?;
    let jar = jar.add(sessions.session_cookie(&session.id));

    Ok((jar, Json(TokenResponse::new(issued, true))))
}

/// `POST /api/auth/refresh`
pub async fn refresh_handler(
    State(tokens): State<TokenService>,
    meta: RequestMeta,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let request = json_body(payload)?;
    if request.refresh_token.is_empty() {
        return Err(AuthError::invalid_request("Refresh token is required"));
    }
    let issued = tokens.refresh(&request.refresh_token, &meta).await?;
    Ok(Json(TokenResponse::new(issued, false)))
}

/// `POST /api/auth/logout`
///
/// Revokes every refresh token of the caller, destroys the current session,
/// and clears the session and token cookies.
pub async fn logout_handler(
    State(tokens): State<TokenService>,
    State(sessions): State<SessionManager>,
    BearerAuth(auth): BearerAuth,
    current: Option<Extension<CurrentSession>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AuthError> {
    tokens.logout(auth.identity_id).await?;

    let session_id = session_id(current, &jar, &sessions);
    let jar = sessions
        .logout(session_id.as_deref())
        .await?
        .into_iter()
        .fold(jar, CookieJar::add);

    Ok((jar, Json(MessageResponse::ok("Logged out successfully"))))
}

/// Id of the session the middleware resolved, which may already be a
/// regenerated one. Falls back to the raw cookie when no middleware ran.
fn session_id(
    current: Option<Extension<CurrentSession>>,
    jar: &CookieJar,
    sessions: &SessionManager,
) -> Option<String> {
    match current {
        Some(Extension(CurrentSession(session))) => Some(session.id),
        None => jar
            .get(&sessions.config().cookie_name)
            .map(|c| c.value().to_string()),
    }
}

/// `POST /api/auth/change-password`
pub async fn change_password_handler(
    State(tokens): State<TokenService>,
    BearerAuth(auth): BearerAuth,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AuthError> {
    let request = json_body(payload)?;
    tokens
        .change_password(
            auth.identity_id,
            &request.current_password,
            &request.new_password,
        )
        .await?;
    Ok(Json(MessageResponse::ok(
        "Password changed successfully. Please login again.",
    )))
}

/// `GET /api/auth/me`
pub async fn me_handler(
    State(tokens): State<TokenService>,
    BearerAuth(auth): BearerAuth,
) -> Result<Json<MeResponse>, AuthError> {
    let identity = tokens.current_identity(auth.identity_id).await?;
    let mut user = UserView::from(&identity);
    // The authenticated context is the permission set the request ran with
    user.permissions = auth.permissions;
    Ok(Json(MeResponse {
        success: true,
        user,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_view_hides_password_hash() {
        let identity = Identity::new("nurse@clinic.example", Role::Staff)
            .with_password_hash("$argon2id$v=19$secret");
        let json = serde_json::to_value(UserView::from(&identity)).unwrap();

        assert_eq!(json["email"], "nurse@clinic.example");
        assert_eq!(json["role"], "staff");
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
        assert!(json.get("clinicId").is_none());
        assert!(
            json["permissions"]
                .as_array()
                .unwrap()
                .iter()
                .any(|p| p == "read:appointments")
        );
    }

    #[test]
    fn test_refresh_request_field_name() {
        let request: RefreshRequest =
            serde_json::from_str(r#"{"refreshToken":"abc"}"#).unwrap();
        assert_eq!(request.refresh_token, "abc");

        let empty: RefreshRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.refresh_token.is_empty());
    }
}
