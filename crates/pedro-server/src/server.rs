use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{FromRef, State},
    middleware,
    routing::get,
};
use pedro_auth::{
    ApiKeyManager, ApiKeyStorage, AuditLogger, AuditStorage, AuthConfig, AuthState, MemoryStore,
    OwnershipGuard, RateLimitPolicy, RefreshTokenStorage, ResourceOwnerStorage, SessionManager,
    SessionStore, TokenCodec, TokenService, UserStorage, audit_middleware, session_middleware,
};
use pedro_auth_postgres::PostgresAuthStorage;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::middleware as app_middleware;
use crate::rate_limit::{RateLimiter, rate_limit_middleware};

/// Backing stores for the authorization layer.
#[derive(Clone)]
pub struct AuthStores {
    pub users: Arc<dyn UserStorage>,
    pub api_keys: Arc<dyn ApiKeyStorage>,
    pub refresh_tokens: Arc<dyn RefreshTokenStorage>,
    pub owners: Arc<dyn ResourceOwnerStorage>,
    pub audit: Arc<dyn AuditStorage>,
    pub sessions: Arc<dyn SessionStore>,
}

impl AuthStores {
    /// Every store served by one in-memory instance.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            api_keys: store.clone(),
            refresh_tokens: store.clone(),
            owners: store.clone(),
            audit: store.clone(),
            sessions: store,
        }
    }

    /// Credential store on PostgreSQL, sessions on `sessions`.
    pub fn postgres(pg: &PostgresAuthStorage, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            users: Arc::new(pg.user_storage()),
            api_keys: Arc::new(pg.api_key_storage()),
            refresh_tokens: Arc::new(pg.refresh_token_storage()),
            owners: Arc::new(pg.ownership_storage()),
            audit: Arc::new(pg.audit_storage()),
            sessions,
        }
    }
}

/// Shared application state. Each service is exposed to extractors and
/// middleware through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub tokens: TokenService,
    pub sessions: SessionManager,
    pub api_keys: ApiKeyManager,
    pub ownership: OwnershipGuard,
    pub audit: AuditLogger,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(stores: AuthStores, config: &AuthConfig) -> Self {
        let timeout = config.store.timeout;
        let codec = Arc::new(TokenCodec::new(&config.token));

        let auth = AuthState::new(codec.clone(), stores.users.clone(), stores.api_keys.clone())
            .with_store_timeout(timeout);
        let tokens = TokenService::new(
            codec,
            stores.users,
            stores.refresh_tokens,
            config.password.clone(),
        )
        .with_store_timeout(timeout);
        let sessions = SessionManager::new(stores.sessions, config.session.clone(), timeout);
        let api_keys = ApiKeyManager::new(stores.api_keys);
        let ownership = OwnershipGuard::new(stores.owners, timeout);
        let audit = AuditLogger::new(stores.audit, &config.audit);
        let rate_limiter = RateLimiter::new(
            RateLimitPolicy::new(config.rate_limiting.clone()),
            auth.clone(),
        );

        Self {
            auth,
            tokens,
            sessions,
            api_keys,
            ownership,
            audit,
            rate_limiter,
        }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl FromRef<AppState> for SessionManager {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for ApiKeyManager {
    fn from_ref(state: &AppState) -> Self {
        state.api_keys.clone()
    }
}

impl FromRef<AppState> for OwnershipGuard {
    fn from_ref(state: &AppState) -> Self {
        state.ownership.clone()
    }
}

impl FromRef<AppState> for AuditLogger {
    fn from_ref(state: &AppState) -> Self {
        state.audit.clone()
    }
}

impl FromRef<AppState> for RateLimiter {
    fn from_ref(state: &AppState) -> Self {
        state.rate_limiter.clone()
    }
}

async fn healthz(State(sessions): State<SessionManager>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessionStore": sessions.backend_name(),
    }))
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;

    // Route layers run outer to inner: audit -> rate limit -> session
    let api = pedro_auth::http::router::<AppState>()
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            session_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.audit.clone(),
            audit_middleware,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(api)
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        // Outermost, so the trace span sees the id
        .layer(middleware::from_fn(app_middleware::request_id))
}

pub struct PedroServer {
    addr: SocketAddr,
    app: Router,
    rate_limiter: RateLimiter,
    sessions: SessionManager,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    state: AppState,
}

impl ServerBuilder {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self {
            addr: config.addr(),
            config,
            state,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn build(self) -> PedroServer {
        let rate_limiter = self.state.rate_limiter.clone();
        let sessions = self.state.sessions.clone();
        let app = build_app(self.state, &self.config);

        PedroServer {
            addr: self.addr,
            app,
            rate_limiter,
            sessions,
        }
    }
}

impl PedroServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let cleanup = self
            .rate_limiter
            .policy()
            .is_enabled()
            .then(|| self.rate_limiter.spawn_cleanup(Duration::from_secs(60)));
        let purge = self.sessions.spawn_purge(Duration::from_secs(60));

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        if let Some(handle) = cleanup {
            handle.abort();
        }
        purge.abort();
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
