//! Session store backends.
//!
//! - **Redis**: shared across instances; entries expire through `SET EX`
//! - **Memory**: single-instance fallback when Redis is disabled or
//!   unreachable at startup

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use pedro_auth::{AuthError, AuthResult, MemoryStore, SessionData, SessionStore};
use redis::AsyncCommands;

use crate::config::RedisConfig;

/// Redis-backed [`SessionStore`]. Payloads are stored as JSON strings.
#[derive(Clone)]
pub struct RedisSessionStore {
    pool: Pool,
}

impl RedisSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> AuthResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| {
            tracing::warn!(error = %e, "Redis pool checkout failed");
            AuthError::storage(format!("redis pool: {e}"))
        })
    }
}

/// Whole seconds for `SET EX`; Redis rejects a zero expiry.
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, key: &str) -> AuthResult<Option<SessionData>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(key).await.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Redis GET error");
            AuthError::storage(format!("redis get: {e}"))
        })?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AuthError::storage(format!("corrupt session entry: {e}"))),
        }
    }

    async fn save(&self, key: &str, data: &SessionData, ttl: Duration) -> AuthResult<()> {
        let payload = serde_json::to_string(data)
            .map_err(|e| AuthError::internal(format!("session encode: {e}")))?;
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, payload, expiry_secs(ttl))
            .await
            .map_err(|e| {
                tracing::warn!(key = %key, error = %e, "Redis SETEX error");
                AuthError::storage(format!("redis setex: {e}"))
            })
    }

    async fn destroy(&self, key: &str) -> AuthResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Redis DEL error");
            AuthError::storage(format!("redis del: {e}"))
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Builds the session store for `config`.
///
/// Falls back to an in-memory store, with a warning, when Redis is disabled,
/// the pool cannot be created or the first connection fails. The choice is
/// made once; a Redis outage after startup surfaces as store errors.
pub async fn create_session_store(config: &RedisConfig) -> Arc<dyn SessionStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory session store");
        return Arc::new(MemoryStore::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    if let Some(ref mut pool_config) = redis_config.pool {
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));
    }

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-memory sessions."
            );
            return Arc::new(MemoryStore::new());
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis session store");
            Arc::new(RedisSessionStore::new(pool))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory sessions."
            );
            Arc::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_secs_never_zero() {
        assert_eq!(expiry_secs(Duration::from_millis(200)), 1);
        assert_eq!(expiry_secs(Duration::from_secs(86_400)), 86_400);
    }

    #[tokio::test]
    async fn test_disabled_redis_uses_memory() {
        let store = create_session_store(&RedisConfig::default()).await;
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_memory() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".to_string(),
            pool_size: 1,
            timeout_ms: 200,
        };
        let store = create_session_store(&config).await;
        assert_eq!(store.backend_name(), "memory");
    }
}
