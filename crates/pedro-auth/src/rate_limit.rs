//! Role-scoped request budgets.
//!
//! This module only decides *how much* a principal may do per window.
//! Counting requests is the job of the request pipeline.

use std::time::Duration;

use serde::Serialize;

use crate::config::RateLimitingConfig;
use crate::middleware::AuthContext;
use crate::role::Role;

/// A request budget: at most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimit {
    #[must_use]
    pub fn window_ms(&self) -> u128 {
        self.window.as_millis()
    }
}

/// Maps a resolved role to its budget.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    config: RateLimitingConfig,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(config: RateLimitingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Budget for `role`; `None` is an unauthenticated caller.
    #[must_use]
    pub fn for_role(&self, role: Option<Role>) -> RateLimit {
        let max_requests = match role {
            Some(Role::SuperAdmin) => self.config.super_admin,
            Some(Role::Admin) => self.config.admin,
            Some(Role::Doctor) => self.config.doctor,
            Some(Role::Staff) => self.config.staff,
            Some(Role::Patient) => self.config.patient,
            Some(Role::ApiClient) => self.config.api_client,
            None => self.config.anonymous,
        };
        RateLimit {
            window: self.config.window,
            max_requests,
        }
    }

    /// Budget for a resolved request context. An API key's own limit wins
    /// over the role default.
    #[must_use]
    pub fn for_context(&self, ctx: &AuthContext) -> RateLimit {
        let mut limit = self.for_role(Some(ctx.role));
        if let Some(max_requests) = ctx.rate_limit_override() {
            limit.max_requests = max_requests;
        }
        limit
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(RateLimitingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApiKey, Identity};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[test]
    fn test_super_admin_widest_anonymous_narrowest() {
        let policy = RateLimitPolicy::default();
        let widest = policy.for_role(Some(Role::SuperAdmin)).max_requests;
        let narrowest = policy.for_role(None).max_requests;
        for role in Role::ALL {
            let max = policy.for_role(Some(role)).max_requests;
            assert!(max <= widest, "{role}");
            assert!(max >= narrowest, "{role}");
        }
        assert!(
            policy.for_role(Some(Role::Patient)).max_requests
                < policy.for_role(Some(Role::Staff)).max_requests
        );
    }

    #[test]
    fn test_window_is_shared() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.for_role(Some(Role::Doctor)).window_ms(), 15 * 60 * 1000);
        assert_eq!(policy.for_role(None).window, Duration::from_secs(900));
    }

    #[test]
    fn test_api_key_limit_overrides_role() {
        let policy = RateLimitPolicy::default();
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: "Voice".to_string(),
            key_hash: ApiKey::hash_secret("sk_live_x"),
            key_prefix: ApiKey::display_prefix("sk_live_x"),
            permissions: None,
            rate_limit: Some(7),
            active: true,
            expires_at: None,
            rotated_from: None,
            created_by: None,
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            revoke_reason: None,
        };
        assert_eq!(policy.for_context(&AuthContext::from_api_key(&key)).max_requests, 7);

        let staff = AuthContext::from_identity(&Identity::new("s@example.com", Role::Staff));
        assert_eq!(policy.for_context(&staff).max_requests, 300);
    }
}
