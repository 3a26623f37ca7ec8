//! Audit middleware.
//!
//! Wraps guarded routes: installs an [`AuditScope`] for extractors and
//! handlers to fill in, lets the request complete, then hands an
//! [`AuditRecord`] to the [`AuditLogger`] without awaiting the write.

use std::collections::HashMap;

use axum::{
    body::{Body, to_bytes},
    extract::{MatchedPath, Query, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use super::{AuditLogger, AuditRecord, AuditScope, RequestMeta};
use crate::error::AuthError;

/// Largest JSON body captured into audit metadata.
const MAX_AUDITED_BODY: usize = 64 * 1024;

/// Axum middleware writing one audit record per request.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/appointments/{id}", get(get_appointment))
///     .layer(axum::middleware::from_fn_with_state(audit_logger, audit_middleware));
/// ```
pub async fn audit_middleware(
    State(logger): State<AuditLogger>,
    request: Request,
    next: Next,
) -> Response {
    if !logger.is_enabled() {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let scope = AuditScope::default();
    parts.extensions.insert(scope.clone());

    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let route = parts
        .extensions
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let meta = RequestMeta::from_parts(&parts);
    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| serde_json::to_value(q).ok())
        .unwrap_or(Value::Null);

    // Buffer small JSON bodies so they can be recorded and still forwarded
    let capture_body = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
        && parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .is_some_and(|len| len <= MAX_AUDITED_BODY);

    let (body, body_json) = if capture_body {
        match to_bytes(body, MAX_AUDITED_BODY).await {
            Ok(bytes) => {
                let json = serde_json::from_slice::<Value>(&bytes).ok();
                (Body::from(bytes), json)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to buffer request body");
                return AuthError::invalid_request("unreadable request body").into_response();
            }
        }
    } else {
        (body, None)
    };

    let response = next.run(Request::from_parts(parts, body)).await;

    let (user_id, action, resource_type, resource_id) = scope.snapshot();
    let record = AuditRecord::builder(action.unwrap_or_else(|| format!("{method} {route}")))
        .user(user_id)
        .resource(resource_type, resource_id)
        .source(&meta)
        .request(method, path)
        .status(response.status().as_u16())
        .metadata(logger.metadata(query, body_json))
        .build();
    logger.log(record);

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Extension, Json, Router,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::{get, post},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AuditConfig;
    use crate::storage::MemoryStore;

    async fn ok(Extension(scope): Extension<AuditScope>) -> StatusCode {
        scope.set_resource("appointment", "42");
        StatusCode::OK
    }

    async fn echo(Json(body): Json<Value>) -> Json<Value> {
        Json(body)
    }

    async fn wait_for_records(store: &MemoryStore, n: usize) {
        for _ in 0..50 {
            if store.audit_records().len() >= n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    fn app(store: Arc<MemoryStore>) -> Router {
        let logger = AuditLogger::new(store, &AuditConfig::default());
        Router::new()
            .route("/items/{id}", get(ok))
            .route("/echo", post(echo))
            .layer(from_fn_with_state(logger, audit_middleware))
    }

    #[tokio::test]
    async fn test_records_route_status_and_resource() {
        let store = Arc::new(MemoryStore::new());
        let response = app(store.clone())
            .oneshot(
                HttpRequest::builder()
                    .uri("/items/42?token=abc&page=2")
                    .header("user-agent", "test-agent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        wait_for_records(&store, 1).await;
        let records = store.audit_records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.action, "GET /items/{id}");
        assert_eq!(record.request_path, "/items/42");
        assert_eq!(record.response_status, 200);
        assert_eq!(record.resource_type.as_deref(), Some("appointment"));
        assert_eq!(record.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(record.metadata["query"]["token"], "[REDACTED]");
        assert_eq!(record.metadata["query"]["page"], "2");
    }

    #[tokio::test]
    async fn test_json_body_is_forwarded_and_redacted() {
        let store = Arc::new(MemoryStore::new());
        let payload = json!({ "email": "a@example.com", "password": "Secret1!" }).to_string();
        let response = app(store.clone())
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/echo")
                    .header("content-type", "application/json")
                    .header("content-length", payload.len())
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let echoed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(echoed["password"], "Secret1!");

        wait_for_records(&store, 1).await;
        let record = &store.audit_records()[0];
        assert_eq!(record.metadata["body"]["email"], "a@example.com");
        assert_eq!(record.metadata["body"]["password"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_request() {
        let store = Arc::new(MemoryStore::new());
        store.fail_audit_appends(true);
        let response = app(store.clone())
            .oneshot(
                HttpRequest::builder()
                    .uri("/items/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
