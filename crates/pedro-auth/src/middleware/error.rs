//! Error response handling for authentication middleware.
//!
//! Every [`AuthError`] renders as `{"error": <message>, "code": <CODE>}` with
//! the status from [`AuthError::status`].

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

/// Realm advertised in `WWW-Authenticate` on 401 responses.
pub const AUTH_REALM: &str = "pedro-dental";

const BEARER_CHALLENGE: &str = "Bearer realm=\"pedro-dental\"";

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();

        if self.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Authorization layer failure");
        } else {
            tracing::debug!(
                error = %self,
                code = self.code(),
                category = %self.category(),
                "Request rejected"
            );
        }

        let body = json!({
            "error": self.public_message(),
            "code": self.code(),
        });

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BEARER_CHALLENGE),
            );
        }
        if let Self::RateLimited { retry_after_secs } = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            headers.insert(header::RETRY_AFTER, value);
        }

        (status, headers, Json(body)).into_response()
    }
}
