//! API key administration. Administrators only.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api_key::{ApiKeyManager, IssuedApiKey, NewApiKey};
use crate::error::AuthError;
use crate::middleware::{Administrators, RequireRole};
use crate::types::ApiKey;

use super::{MessageResponse, json_body};

const SHOWN_ONCE: &str = "Store this API key securely. It will not be shown again.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApiKeyResponse {
    pub success: bool,
    /// The secret. Only ever returned here.
    pub api_key: String,
    pub api_key_info: ApiKey,
    pub warning: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedApiKeyResponse {
    pub success: bool,
    pub new_api_key: String,
    pub api_key_info: ApiKey,
    pub warning: &'static str,
}

/// `POST /api/api-keys`
pub async fn create_api_key_handler(
    State(manager): State<ApiKeyManager>,
    admin: RequireRole<Administrators>,
    payload: Result<Json<NewApiKey>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), AuthError> {
    let request = json_body(payload)?;
    let IssuedApiKey { secret, key } = manager.create(request, admin.auth.identity_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKeyResponse {
            success: true,
            api_key: secret,
            api_key_info: key,
            warning: SHOWN_ONCE,
        }),
    ))
}

/// `POST /api/api-keys/{id}/rotate`
pub async fn rotate_api_key_handler(
    State(manager): State<ApiKeyManager>,
    admin: RequireRole<Administrators>,
    Path(id): Path<String>,
) -> Result<Json<RotatedApiKeyResponse>, AuthError> {
    let id = parse_key_id(&id)?;
    let IssuedApiKey { secret, key } = manager.rotate(id, admin.auth.identity_id).await?;
    Ok(Json(RotatedApiKeyResponse {
        success: true,
        new_api_key: secret,
        api_key_info: key,
        warning: SHOWN_ONCE,
    }))
}

/// `DELETE /api/api-keys/{id}`
pub async fn revoke_api_key_handler(
    State(manager): State<ApiKeyManager>,
    admin: RequireRole<Administrators>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AuthError> {
    let id = parse_key_id(&id)?;
    manager.revoke(id, admin.auth.identity_id).await?;
    Ok(Json(MessageResponse::ok("API key has been revoked")))
}

/// A malformed id cannot name any key.
fn parse_key_id(id: &str) -> Result<Uuid, AuthError> {
    Uuid::parse_str(id).map_err(|_| AuthError::ApiKeyNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_id_is_not_found() {
        assert_eq!(parse_key_id("42").unwrap_err().code(), "API_KEY_NOT_FOUND");
        let id = Uuid::new_v4();
        assert_eq!(parse_key_id(&id.to_string()).unwrap(), id);
    }
}
