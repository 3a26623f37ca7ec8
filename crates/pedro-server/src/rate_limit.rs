//! Role-scoped fixed-window rate limiting.
//!
//! Requests are counted per principal: `user:<id>` for bearer callers,
//! `key:<id>` for API clients and `ip:<addr>` for unauthenticated callers.
//! The budget comes from [`RateLimitPolicy`], so an API key's own limit
//! overrides its role default.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use pedro_auth::{
    AuditScope, AuthContext, AuthError, AuthMethod, AuthState, FlexibleAuth, RateLimit,
    RateLimitPolicy, RequestMeta,
};
use tokio::task::JoinHandle;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

struct WindowEntry {
    count: u32,
    window_start: Instant,
    window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

/// Counts requests per principal against the policy budgets.
#[derive(Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    auth: AuthState,
    counters: Arc<DashMap<String, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, auth: AuthState) -> Self {
        Self {
            policy,
            auth,
            counters: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Counts one request for `key` under `limit`.
    pub fn check(&self, key: &str, limit: RateLimit) -> RateLimitDecision {
        self.check_at(key, limit, Instant::now())
    }

    fn check_at(&self, key: &str, limit: RateLimit, now: Instant) -> RateLimitDecision {
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                window_start: now,
                window: limit.window,
            });

        // Reset window if expired
        if now.duration_since(entry.window_start) >= limit.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.window = limit.window;
        entry.count = entry.count.saturating_add(1);

        if entry.count > limit.max_requests {
            let reset_at = entry.window_start + limit.window;
            RateLimitDecision::Exceeded {
                retry_after: reset_at.saturating_duration_since(now),
            }
        } else {
            RateLimitDecision::Allowed {
                remaining: limit.max_requests - entry.count,
            }
        }
    }

    /// Drops counters whose window has fully elapsed.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    fn cleanup_at(&self, now: Instant) {
        self.counters
            .retain(|_, entry| now.duration_since(entry.window_start) < entry.window);
    }

    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    /// Runs [`Self::cleanup`] every `every` until the runtime shuts down.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.cleanup();
                tracing::trace!(keys = limiter.tracked_keys(), "rate limit counters pruned");
            }
        })
    }
}

/// Counter key for a resolved principal.
pub fn principal_key(ctx: &AuthContext) -> String {
    match &ctx.method {
        AuthMethod::ApiKey { key_id, .. } => format!("key:{key_id}"),
        AuthMethod::Bearer => format!("user:{}", ctx.identity_id),
    }
}

/// Axum middleware enforcing the per-principal budget.
///
/// Resolves the principal once; a successful resolution is cached in the
/// request extensions for the route extractors. Unresolvable credentials
/// count against the caller ip under the anonymous budget and are rejected
/// later by the route itself.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.policy.is_enabled() {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();

    let (key, limit) = match FlexibleAuth::from_request_parts(&mut parts, &limiter.auth).await {
        Ok(FlexibleAuth(ctx)) => {
            if let Some(scope) = parts.extensions.get::<AuditScope>() {
                scope.set_principal(&ctx);
            }
            (principal_key(&ctx), limiter.policy.for_context(&ctx))
        }
        Err(_) => {
            let ip = RequestMeta::from_parts(&parts)
                .ip_address
                .unwrap_or_else(|| "unknown".to_string());
            (format!("ip:{ip}"), limiter.policy.for_role(None))
        }
    };

    match limiter.check(&key, limit) {
        RateLimitDecision::Allowed { remaining } => {
            let mut response = next.run(Request::from_parts(parts, body)).await;
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(limit.max_requests));
            headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            response
        }
        RateLimitDecision::Exceeded { retry_after } => {
            // Round up so clients never retry inside the window
            let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            tracing::warn!(
                key = %key,
                retry_after_secs,
                "Rate limit exceeded"
            );
            let mut response = AuthError::RateLimited { retry_after_secs }.into_response();
            response
                .headers_mut()
                .insert(LIMIT_HEADER, HeaderValue::from(limit.max_requests));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedro_auth::config::{RateLimitingConfig, TokenConfig};
    use pedro_auth::{Identity, MemoryStore, Role, TokenCodec};

    fn limiter() -> RateLimiter {
        let store = Arc::new(MemoryStore::new());
        let codec = Arc::new(TokenCodec::new(&TokenConfig {
            secret: "rate-limit-test-secret-rate-limit-test".to_string(),
            ..TokenConfig::default()
        }));
        RateLimiter::new(
            RateLimitPolicy::new(RateLimitingConfig::default()),
            AuthState::new(codec, store.clone(), store),
        )
    }

    fn budget(max_requests: u32) -> RateLimit {
        RateLimit {
            window: Duration::from_secs(60),
            max_requests,
        }
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let limiter = limiter();
        for expected in (0..3).rev() {
            assert_eq!(
                limiter.check("user:a", budget(3)),
                RateLimitDecision::Allowed {
                    remaining: expected
                }
            );
        }
        match limiter.check("user:a", budget(3)) {
            RateLimitDecision::Exceeded { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
                assert!(retry_after > Duration::from_secs(55));
            }
            other => panic!("expected exceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter();
        assert!(matches!(
            limiter.check("user:a", budget(1)),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("user:a", budget(1)),
            RateLimitDecision::Exceeded { .. }
        ));
        assert!(matches!(
            limiter.check("ip:203.0.113.7", budget(1)),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter();
        let start = Instant::now();
        assert!(matches!(
            limiter.check_at("user:a", budget(1), start),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_at("user:a", budget(1), start + Duration::from_secs(30)),
            RateLimitDecision::Exceeded { .. }
        ));
        assert_eq!(
            limiter.check_at("user:a", budget(1), start + Duration::from_secs(60)),
            RateLimitDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn test_cleanup_drops_elapsed_windows() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.check_at("user:old", budget(5), start);
        limiter.check_at("user:new", budget(5), start + Duration::from_secs(90));
        assert_eq!(limiter.tracked_keys(), 2);
        limiter.cleanup_at(start + Duration::from_secs(100));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_principal_keys() {
        let identity = Identity::new("d@example.com", Role::Doctor);
        let ctx = AuthContext::from_identity(&identity);
        assert_eq!(principal_key(&ctx), format!("user:{}", identity.id));
    }
}
