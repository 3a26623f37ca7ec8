//! Security audit logging.
//!
//! Audit records are immutable and append-only. They are written after the
//! guarded request has produced its response, on a detached task, so a slow
//! or failing audit store never delays or fails the request itself. Write
//! failures are reported through `tracing` and otherwise dropped.
//!
//! Request metadata (query string and JSON body) is stored with secret
//! fields replaced by [`REDACTED`].

pub mod middleware;

use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, header, request::Parts};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::middleware::AuthContext;
use crate::storage::AuditStorage;

pub use middleware::audit_middleware;

/// Replacement value for redacted metadata fields.
pub const REDACTED: &str = "[REDACTED]";

// =============================================================================
// Audit Record
// =============================================================================

/// One audited request outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// `None` for anonymous or failed authentication.
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_method: String,
    pub request_path: String,
    pub response_status: u16,
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuditRecord {
    /// Starts a record for `action`.
    #[must_use]
    pub fn builder(action: impl Into<String>) -> AuditRecordBuilder {
        AuditRecordBuilder::new(action)
    }
}

/// Builder for [`AuditRecord`].
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
    record: AuditRecord,
}

impl AuditRecordBuilder {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            record: AuditRecord {
                id: Uuid::new_v4(),
                user_id: None,
                action: action.into(),
                resource_type: None,
                resource_id: None,
                ip_address: None,
                user_agent: None,
                request_method: String::new(),
                request_path: String::new(),
                response_status: 0,
                metadata: Value::Null,
                created_at: OffsetDateTime::now_utc(),
            },
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.record.user_id = user_id;
        self
    }

    #[must_use]
    pub fn resource(mut self, resource_type: Option<String>, resource_id: Option<String>) -> Self {
        self.record.resource_type = resource_type;
        self.record.resource_id = resource_id;
        self
    }

    #[must_use]
    pub fn source(mut self, meta: &RequestMeta) -> Self {
        self.record.ip_address = meta.ip_address.clone();
        self.record.user_agent = meta.user_agent.clone();
        self
    }

    #[must_use]
    pub fn request(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.record.request_method = method.into();
        self.record.request_path = path.into();
        self
    }

    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.record.response_status = status;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.record.metadata = metadata;
        self
    }

    #[must_use]
    pub fn build(self) -> AuditRecord {
        self.record
    }
}

// =============================================================================
// Request Metadata
// =============================================================================

/// Caller address and user agent of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Reads `X-Forwarded-For` (first hop), then `X-Real-IP`, and `User-Agent`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let ip_address = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self {
            ip_address,
            user_agent,
        }
    }

    /// Uses `fallback_ip` (usually the socket peer) when no proxy header is set.
    #[must_use]
    pub fn with_fallback_ip(mut self, fallback_ip: Option<String>) -> Self {
        if self.ip_address.is_none() {
            self.ip_address = fallback_ip;
        }
        self
    }

    /// Proxy headers first, then the socket peer when the server was started
    /// with connect info.
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        let peer_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Self::from_headers(&parts.headers).with_fallback_ip(peer_ip)
    }
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

// =============================================================================
// Audit Scope
// =============================================================================

#[derive(Debug, Default)]
struct ScopeState {
    user_id: Option<Uuid>,
    action: Option<String>,
    resource_type: Option<String>,
    resource_id: Option<String>,
}

/// Per-request slot filled in by extractors and handlers, read by the audit
/// middleware once the response is ready.
#[derive(Debug, Clone, Default)]
pub struct AuditScope(Arc<Mutex<ScopeState>>);

impl AuditScope {
    /// Records the authenticated principal.
    pub fn set_principal(&self, ctx: &AuthContext) {
        if let Ok(mut state) = self.0.lock() {
            state.user_id = Some(ctx.identity_id);
        }
    }

    /// Overrides the action name derived from the route.
    pub fn set_action(&self, action: impl Into<String>) {
        if let Ok(mut state) = self.0.lock() {
            state.action = Some(action.into());
        }
    }

    /// Records the resource the request acted on.
    pub fn set_resource(&self, resource_type: impl Into<String>, resource_id: impl Into<String>) {
        if let Ok(mut state) = self.0.lock() {
            state.resource_type = Some(resource_type.into());
            state.resource_id = Some(resource_id.into());
        }
    }

    fn snapshot(&self) -> (Option<Uuid>, Option<String>, Option<String>, Option<String>) {
        match self.0.lock() {
            Ok(state) => (
                state.user_id,
                state.action.clone(),
                state.resource_type.clone(),
                state.resource_id.clone(),
            ),
            Err(_) => (None, None, None, None),
        }
    }
}

// =============================================================================
// Audit Logger
// =============================================================================

/// Writes audit records off the request path.
#[derive(Clone)]
pub struct AuditLogger {
    storage: Arc<dyn AuditStorage>,
    enabled: bool,
    redact_fields: Arc<HashSet<String>>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(storage: Arc<dyn AuditStorage>, config: &AuditConfig) -> Self {
        Self {
            storage,
            enabled: config.enabled,
            redact_fields: Arc::new(config.redact_fields.iter().cloned().collect()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Appends `record` on a detached task.
    ///
    /// Never fails: storage errors are logged and dropped. The returned
    /// handle is only useful for tests that need to wait for the write.
    pub fn log(&self, record: AuditRecord) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }

        let storage = self.storage.clone();
        Some(tokio::spawn(async move {
            match storage.append(&record).await {
                Ok(()) => tracing::debug!(
                    audit_id = %record.id,
                    action = %record.action,
                    status = record.response_status,
                    "Audit record written"
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    audit_id = %record.id,
                    action = %record.action,
                    "Failed to write audit record"
                ),
            }
        }))
    }

    /// Builds the metadata payload from the query map and JSON body.
    #[must_use]
    pub fn metadata(&self, query: Value, body: Option<Value>) -> Value {
        json!({
            "query": self.redact(query),
            "body": body.map(|b| self.redact(b)),
        })
    }

    /// Replaces the values of configured secret keys, recursively.
    #[must_use]
    pub fn redact(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        if self.redact_fields.contains(&k) {
                            (k, Value::String(REDACTED.to_string()))
                        } else {
                            (k, self.redact(v))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.redact(v)).collect()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn logger(store: Arc<MemoryStore>) -> AuditLogger {
        AuditLogger::new(store, &AuditConfig::default())
    }

    #[test]
    fn test_redact_nested_secrets() {
        let logger = logger(Arc::new(MemoryStore::new()));
        let redacted = logger.redact(json!({
            "email": "a@example.com",
            "password": "hunter2",
            "nested": { "refreshToken": "abc", "keep": 1 },
            "list": [{ "apiKey": "sk_live_x" }]
        }));

        assert_eq!(redacted["email"], "a@example.com");
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["nested"]["refreshToken"], REDACTED);
        assert_eq!(redacted["nested"]["keep"], 1);
        assert_eq!(redacted["list"][0]["apiKey"], REDACTED);
    }

    #[test]
    fn test_metadata_shape() {
        let logger = logger(Arc::new(MemoryStore::new()));
        let metadata = logger.metadata(json!({ "api_key": "sk" }), None);
        assert_eq!(metadata["query"]["api_key"], REDACTED);
        assert!(metadata["body"].is_null());
    }

    #[tokio::test]
    async fn test_log_appends_record() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger(store.clone());
        let record = AuditRecord::builder("GET /api/appointments/{id}")
            .request("GET", "/api/appointments/1")
            .status(200)
            .build();

        logger.log(record.clone()).unwrap().await.unwrap();
        assert_eq!(store.audit_records(), vec![record]);
    }

    #[tokio::test]
    async fn test_log_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        store.fail_audit_appends(true);
        let logger = logger(store.clone());

        let handle = logger.log(AuditRecord::builder("x").build()).unwrap();
        assert!(handle.await.is_ok());
        assert!(store.audit_records().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_logger_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(
            store.clone(),
            &AuditConfig {
                enabled: false,
                ..AuditConfig::default()
            },
        );
        assert!(logger.log(AuditRecord::builder("x").build()).is_none());
    }

    #[test]
    fn test_request_meta_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert(header::USER_AGENT, "curl/8".parse().unwrap());

        let meta = RequestMeta::from_headers(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_request_meta_fallback_ip() {
        let meta = RequestMeta::from_headers(&HeaderMap::new())
            .with_fallback_ip(Some("127.0.0.1".to_string()));
        assert_eq!(meta.ip_address.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_scope_records_resource() {
        let scope = AuditScope::default();
        scope.set_resource("appointment", "42");
        scope.set_action("read_appointment");
        let (user, action, rt, rid) = scope.snapshot();
        assert!(user.is_none());
        assert_eq!(action.as_deref(), Some("read_appointment"));
        assert_eq!(rt.as_deref(), Some("appointment"));
        assert_eq!(rid.as_deref(), Some("42"));
    }
}
