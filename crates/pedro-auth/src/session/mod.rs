//! Server-side session management.
//!
//! Sessions are keyed by an opaque random id carried in the session cookie
//! and stored under a namespaced key in a [`SessionStore`] with a rolling
//! TTL. Lifecycle:
//!
//! - *absent* → *active*: [`SessionManager::login`] issues a fresh id (any
//!   previous session is destroyed) and records the identity and login time
//! - *active* → *active*: [`SessionManager::touch`] records activity and
//!   renews the TTL; [`SessionManager::enforce_rotation`] swaps the id once
//!   the login time is older than the configured regeneration age
//! - *active* → *absent*: [`SessionManager::destroy`] removes the entry; the
//!   caller must also send [`SessionManager::removal_cookies`]

pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::{SameSitePolicy, SessionConfig};
use crate::error::AuthError;
use crate::storage::SessionStore;
use crate::types::Identity;

pub use middleware::{CurrentSession, session_middleware};

/// Client-held cookies cleared on logout besides the session cookie.
pub const TOKEN_COOKIES: [&str; 2] = ["token", "refreshToken"];

/// Payload stored for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    #[serde(default)]
    pub authenticated: bool,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub login_time: Option<OffsetDateTime>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,

    #[serde(default)]
    pub activity_count: u64,

    /// Free-form application data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// A loaded session: its id and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub data: SessionData,
}

/// Creates, rotates, touches and destroys sessions.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    timeout: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig, timeout: Duration) -> Self {
        Self {
            store,
            config,
            timeout,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Generates an opaque session id: 32 random bytes, base64url.
    #[must_use]
    pub fn generate_id() -> String {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.config.key_prefix, id)
    }

    /// Loads a session by id.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn load(&self, id: &str) -> AuthResult<Option<Session>> {
        let key = self.key(id);
        let data = self.bounded(self.store.load(&key)).await?;
        Ok(data.map(|data| Session {
            id: id.to_string(),
            data,
        }))
    }

    /// Writes a session and renews its TTL.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn save(&self, session: &Session) -> AuthResult<()> {
        let key = self.key(&session.id);
        self.bounded(self.store.save(&key, &session.data, self.config.ttl))
            .await
    }

    /// Starts an authenticated session for `identity`.
    ///
    /// Always issues a new id; the `previous` session, if any, is destroyed
    /// so a pre-login id can never become authenticated.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn login(
        &self,
        previous: Option<&str>,
        identity: &Identity,
        data: Map<String, Value>,
    ) -> AuthResult<Session> {
        if let Some(previous) = previous {
            self.destroy(previous).await?;
        }

        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: Self::generate_id(),
            data: SessionData {
                user_id: Some(identity.id),
                authenticated: true,
                login_time: Some(now),
                last_activity: Some(now),
                activity_count: 0,
                data,
            },
        };
        self.save(&session).await?;

        tracing::info!(user_id = %identity.id, "Session started");
        Ok(session)
    }

    /// Moves a session to a fresh id, keeping its payload.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn regenerate(&self, session: Session) -> AuthResult<Session> {
        let old_id = session.id;
        let regenerated = Session {
            id: Self::generate_id(),
            data: session.data,
        };
        self.save(&regenerated).await?;
        self.destroy(&old_id).await?;
        Ok(regenerated)
    }

    /// Returns `true` if the session's login time is older than the
    /// regeneration age at `now`.
    #[must_use]
    pub fn needs_regeneration(&self, data: &SessionData, now: OffsetDateTime) -> bool {
        let Some(login_time) = data.login_time else {
            return false;
        };
        let max_age = time::Duration::try_from(self.config.regenerate_after)
            .unwrap_or(time::Duration::MAX);
        now - login_time > max_age
    }

    /// Applies the periodic regeneration policy.
    ///
    /// Returns the session to continue with and whether its id changed. A
    /// regenerated session keeps its payload and gets a refreshed login time.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn enforce_rotation(
        &self,
        mut session: Session,
        now: OffsetDateTime,
    ) -> AuthResult<(Session, bool)> {
        if !session.data.authenticated || !self.needs_regeneration(&session.data, now) {
            return Ok((session, false));
        }

        session.data.login_time = Some(now);
        let regenerated = self.regenerate(session).await?;
        tracing::debug!(
            user_id = ?regenerated.data.user_id,
            "Session regenerated after maximum age"
        );
        Ok((regenerated, true))
    }

    /// Records activity and renews the TTL.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn touch(&self, session: &mut Session, now: OffsetDateTime) -> AuthResult<()> {
        session.data.last_activity = Some(now);
        session.data.activity_count = session.data.activity_count.saturating_add(1);
        self.save(session).await
    }

    /// Removes a session from the store.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn destroy(&self, id: &str) -> AuthResult<()> {
        let key = self.key(id);
        self.bounded(self.store.destroy(&key)).await
    }

    /// Ends the browser session: destroys `id` when present and returns the
    /// cookies that clear the session and token cookies on the client.
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the store fails or times out.
    pub async fn logout(&self, id: Option<&str>) -> AuthResult<Vec<Cookie<'static>>> {
        if let Some(id) = id {
            self.destroy(id).await?;
            tracing::info!("Session destroyed");
        }
        Ok(self.removal_cookies())
    }

    /// Runs the store's expiry sweep every `every` until the runtime shuts
    /// down. A failed sweep is logged and retried on the next tick.
    pub fn spawn_purge(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "Expired sessions purged"),
                    Err(e) => tracing::warn!(error = %e, "Session purge failed"),
                }
            }
        })
    }

    /// Cookie carrying `id`.
    #[must_use]
    pub fn session_cookie(&self, id: &str) -> Cookie<'static> {
        let max_age = time::Duration::try_from(self.config.ttl).unwrap_or(time::Duration::MAX);
        let mut builder = Cookie::build((self.config.cookie_name.clone(), id.to_string()))
            .http_only(self.config.http_only)
            .secure(self.config.secure)
            .same_site(same_site(self.config.same_site))
            .path(self.config.path.clone())
            .max_age(max_age);
        if let Some(domain) = &self.config.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Cookies that clear the session cookie and the client-held tokens.
    #[must_use]
    pub fn removal_cookies(&self) -> Vec<Cookie<'static>> {
        std::iter::once(self.config.cookie_name.clone())
            .chain(TOKEN_COOKIES.iter().map(|name| (*name).to_string()))
            .map(|name| {
                let mut cookie = Cookie::build((name, ""))
                    .path(self.config.path.clone())
                    .build();
                if let Some(domain) = &self.config.domain {
                    cookie.set_domain(domain.clone());
                }
                cookie.make_removal();
                cookie
            })
            .collect()
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = AuthResult<T>>,
    ) -> AuthResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| Err(AuthError::storage("session store timed out")))
    }
}

fn same_site(policy: SameSitePolicy) -> SameSite {
    match policy {
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::None => SameSite::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;
    use crate::storage::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, SessionManager) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(
            store.clone(),
            SessionConfig::default(),
            Duration::from_secs(1),
        );
        (store, manager)
    }

    #[tokio::test]
    async fn test_spawned_purge_sweeps_store() {
        let (store, manager) = manager();
        store
            .save("sess:stale", &SessionData::default(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.session_count(), 1);

        let handle = manager.spawn_purge(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_login_creates_authenticated_session() {
        let (_, manager) = manager();
        let identity = Identity::new("p@example.com", Role::Patient);

        let session = manager.login(None, &identity, Map::new()).await.unwrap();
        assert!(session.data.authenticated);
        assert_eq!(session.data.user_id, Some(identity.id));
        assert!(session.data.login_time.is_some());

        let loaded = manager.load(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_login_regenerates_previous_id() {
        let (_, manager) = manager();
        let anonymous = Session {
            id: SessionManager::generate_id(),
            data: SessionData::default(),
        };
        manager.save(&anonymous).await.unwrap();

        let identity = Identity::new("p@example.com", Role::Patient);
        let session = manager
            .login(Some(&anonymous.id), &identity, Map::new())
            .await
            .unwrap();

        assert_ne!(session.id, anonymous.id);
        assert!(manager.load(&anonymous.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_old_session_is_regenerated_with_same_identity() {
        let (_, manager) = manager();
        let identity = Identity::new("d@example.com", Role::Doctor);
        let mut session = manager.login(None, &identity, Map::new()).await.unwrap();
        let now = OffsetDateTime::now_utc();
        session.data.login_time = Some(now - time::Duration::hours(7));
        manager.save(&session).await.unwrap();
        let original_id = session.id.clone();

        let (rotated, changed) = manager.enforce_rotation(session, now).await.unwrap();

        assert!(changed);
        assert_ne!(rotated.id, original_id);
        assert_eq!(rotated.data.user_id, Some(identity.id));
        assert_eq!(rotated.data.login_time, Some(now));
        assert!(manager.load(&original_id).await.unwrap().is_none());
        assert!(manager.load(&rotated.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_young_session_is_kept() {
        let (_, manager) = manager();
        let identity = Identity::new("d@example.com", Role::Doctor);
        let session = manager.login(None, &identity, Map::new()).await.unwrap();
        let id = session.id.clone();

        let (kept, changed) = manager
            .enforce_rotation(session, OffsetDateTime::now_utc() + time::Duration::hours(5))
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(kept.id, id);
    }

    #[tokio::test]
    async fn test_touch_tracks_activity() {
        let (_, manager) = manager();
        let identity = Identity::new("s@example.com", Role::Staff);
        let mut session = manager.login(None, &identity, Map::new()).await.unwrap();
        let later = OffsetDateTime::now_utc() + time::Duration::minutes(5);

        manager.touch(&mut session, later).await.unwrap();
        manager.touch(&mut session, later).await.unwrap();

        let loaded = manager.load(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.data.activity_count, 2);
        assert_eq!(loaded.data.last_activity, Some(later));
    }

    #[tokio::test]
    async fn test_destroy_removes_session() {
        let (_, manager) = manager();
        let identity = Identity::new("s@example.com", Role::Staff);
        let session = manager.login(None, &identity, Map::new()).await.unwrap();

        manager.destroy(&session.id).await.unwrap();
        assert!(manager.load(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_destroys_and_clears_cookies() {
        let (_, manager) = manager();
        let identity = Identity::new("s@example.com", Role::Staff);
        let session = manager.login(None, &identity, Map::new()).await.unwrap();

        let cookies = manager.logout(Some(&session.id)).await.unwrap();
        assert_eq!(cookies.len(), 3);
        assert!(manager.load(&session.id).await.unwrap().is_none());
        assert_eq!(manager.logout(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_store_failure_is_storage_error() {
        let (store, manager) = manager();
        store.fail_sessions(true);
        let err = manager.load("abc").await.unwrap_err();
        assert!(err.is_server_error());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let (_, manager) = manager();
        let cookie = manager.session_cookie("abc");
        assert_eq!(cookie.name(), "pedro.sid");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(24)));
    }

    #[test]
    fn test_removal_cookies_clear_session_and_tokens() {
        let (_, manager) = manager();
        let cookies = manager.removal_cookies();
        let names: Vec<&str> = cookies.iter().map(Cookie::name).collect();
        assert_eq!(names, vec!["pedro.sid", "token", "refreshToken"]);
        for cookie in &cookies {
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SessionManager::generate_id();
        let b = SessionManager::generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }
}
