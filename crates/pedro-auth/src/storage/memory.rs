//! In-memory storage backend.
//!
//! [`MemoryStore`] implements every storage trait over `DashMap`s. It is
//! non-durable: everything is lost on restart. The server uses it as the
//! degraded session store when Redis is unreachable at startup; tests use
//! it for everything, together with the failure switches below.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::audit::AuditRecord;
use crate::error::AuthError;
use crate::ownership::{ResourceOwner, ResourceType};
use crate::session::SessionData;
use crate::types::{ApiKey, ApiKeyUsage, Identity, RefreshTokenRecord};

use super::{
    ApiKeyStorage, AuditStorage, RefreshTokenStorage, ResourceOwnerStorage, SessionStore,
    UserStorage,
};

#[derive(Debug, Clone)]
struct SessionEntry {
    data: SessionData,
    /// `None` when the TTL runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl SessionEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Non-durable store implementing all storage traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, Identity>,
    api_keys: DashMap<Uuid, ApiKey>,
    api_key_usage: Mutex<Vec<ApiKeyUsage>>,
    refresh_tokens: DashMap<String, RefreshTokenRecord>,
    owners: DashMap<(ResourceType, Uuid), ResourceOwner>,
    audit: Mutex<Vec<AuditRecord>>,
    sessions: DashMap<String, SessionEntry>,

    lookup_delay_ms: AtomicU64,
    fail_ownership: AtomicBool,
    fail_sessions: AtomicBool,
    fail_audit: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an identity.
    pub fn insert_user(&self, identity: Identity) {
        self.users.insert(identity.id, identity);
    }

    /// Inserts or replaces an API key.
    pub fn insert_api_key(&self, key: ApiKey) {
        self.api_keys.insert(key.id, key);
    }

    /// Records the owners of a guarded resource instance.
    pub fn insert_owner(&self, resource_type: ResourceType, id: Uuid, owner: ResourceOwner) {
        self.owners.insert((resource_type, id), owner);
    }

    #[must_use]
    pub fn api_key(&self, id: Uuid) -> Option<ApiKey> {
        self.api_keys.get(&id).map(|k| k.clone())
    }

    #[must_use]
    pub fn user(&self, id: Uuid) -> Option<Identity> {
        self.users.get(&id).map(|u| u.clone())
    }

    /// Stored sessions, expired ones included until purged.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Appended audit records, oldest first.
    #[must_use]
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Recorded API key calls, oldest first.
    #[must_use]
    pub fn api_key_usage(&self) -> Vec<ApiKeyUsage> {
        self.api_key_usage
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    /// Refresh token records issued to `user_id`.
    #[must_use]
    pub fn refresh_records(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.refresh_tokens
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect()
    }

    /// Delays identity and API key lookups, to exercise store timeouts.
    pub fn set_lookup_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.lookup_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Makes ownership lookups fail with a storage error.
    pub fn fail_ownership_lookups(&self, fail: bool) {
        self.fail_ownership.store(fail, Ordering::SeqCst);
    }

    /// Makes every session operation fail with a storage error.
    pub fn fail_sessions(&self, fail: bool) {
        self.fail_sessions.store(fail, Ordering::SeqCst);
    }

    /// Makes audit appends fail with a storage error.
    pub fn fail_audit_appends(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    async fn lookup_delay(&self) {
        let millis = self.lookup_delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn check_sessions(&self) -> AuthResult<()> {
        if self.fail_sessions.load(Ordering::SeqCst) {
            Err(AuthError::storage("session store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UserStorage for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>> {
        self.lookup_delay().await;
        Ok(self.user(id))
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        self.lookup_delay().await;
        let email = email.to_lowercase();
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone()))
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> AuthResult<()> {
        match self.users.get_mut(&id) {
            Some(mut user) => {
                user.password_hash = Some(password_hash.to_string());
                Ok(())
            }
            None => Err(AuthError::UserNotFound),
        }
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        if let Some(mut user) = self.users.get_mut(&id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStorage for MemoryStore {
    async fn find_by_hash(&self, key_hash: &str) -> AuthResult<Option<ApiKey>> {
        self.lookup_delay().await;
        Ok(self
            .api_keys
            .iter()
            .find(|k| k.key_hash == key_hash)
            .map(|k| k.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<ApiKey>> {
        Ok(self.api_key(id))
    }

    async fn create(&self, key: &ApiKey) -> AuthResult<()> {
        if self.api_keys.iter().any(|k| k.key_hash == key.key_hash) {
            return Err(AuthError::storage("duplicate API key hash"));
        }
        self.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn deactivate(&self, id: Uuid, reason: &str) -> AuthResult<bool> {
        match self.api_keys.get_mut(&id) {
            Some(mut key) if key.active => {
                key.active = false;
                key.revoked_at = Some(OffsetDateTime::now_utc());
                key.revoke_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_usage(&self, usage: &ApiKeyUsage) -> AuthResult<()> {
        self.api_key_usage
            .lock()
            .map_err(|_| AuthError::storage("usage log poisoned"))?
            .push(usage.clone());
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStorage for MemoryStore {
    async fn create(&self, record: &RefreshTokenRecord) -> AuthResult<()> {
        self.refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshTokenRecord>> {
        // The shard write lock makes check-and-revoke atomic per hash.
        let Some(mut record) = self.refresh_tokens.get_mut(token_hash) else {
            return Ok(None);
        };
        if !record.is_valid_at(now) {
            return Ok(None);
        }
        record.revoked_at = Some(now);
        Ok(Some(record.clone()))
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> AuthResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut revoked = 0;
        for mut record in self.refresh_tokens.iter_mut() {
            if record.user_id == user_id && !record.is_revoked() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl ResourceOwnerStorage for MemoryStore {
    async fn find_owner(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> AuthResult<Option<ResourceOwner>> {
        if self.fail_ownership.load(Ordering::SeqCst) {
            return Err(AuthError::storage("ownership store unavailable"));
        }
        Ok(self.owners.get(&(resource_type, id)).map(|o| *o))
    }
}

#[async_trait]
impl AuditStorage for MemoryStore {
    async fn append(&self, record: &AuditRecord) -> AuthResult<()> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(AuthError::storage("audit store unavailable"));
        }
        self.audit
            .lock()
            .map_err(|_| AuthError::storage("audit log poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, key: &str) -> AuthResult<Option<SessionData>> {
        self.check_sessions()?;
        let Some(entry) = self.sessions.get(key).map(|e| e.clone()) else {
            return Ok(None);
        };
        if entry.is_expired(Instant::now()) {
            self.sessions.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.data))
    }

    async fn save(&self, key: &str, data: &SessionData, ttl: Duration) -> AuthResult<()> {
        self.check_sessions()?;
        self.sessions.insert(
            key.to_string(),
            SessionEntry {
                data: data.clone(),
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn destroy(&self, key: &str) -> AuthResult<()> {
        self.check_sessions()?;
        self.sessions.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> AuthResult<usize> {
        let now = Instant::now();
        let mut purged = 0;
        self.sessions.retain(|_, entry| {
            let expired = entry.is_expired(now);
            purged += usize::from(expired);
            !expired
        });
        Ok(purged)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[tokio::test]
    async fn test_find_by_email_is_case_insensitive() {
        let store = MemoryStore::new();
        let identity = Identity::new("Dr.Smith@Example.com", Role::Doctor);
        store.insert_user(identity.clone());

        let found = store.find_by_email("DR.SMITH@example.COM").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(identity.id));
    }

    #[tokio::test]
    async fn test_refresh_consume_is_single_use() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        let record =
            RefreshTokenRecord::new(Uuid::new_v4(), "token", now + time::Duration::days(7));
        RefreshTokenStorage::create(&store, &record).await.unwrap();

        assert!(store.consume(&record.token_hash, now).await.unwrap().is_some());
        assert!(store.consume(&record.token_hash, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_consume_rejects_expired() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        let record = RefreshTokenRecord::new(Uuid::new_v4(), "token", now - time::Duration::SECOND);
        RefreshTokenStorage::create(&store, &record).await.unwrap();

        assert!(store.consume(&record.token_hash, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let expiry = OffsetDateTime::now_utc() + time::Duration::days(7);
        for (owner, token) in [(user, "a"), (user, "b"), (other, "c")] {
            RefreshTokenStorage::create(&store, &RefreshTokenRecord::new(owner, token, expiry))
                .await
                .unwrap();
        }

        assert_eq!(store.revoke_all_for_user(user).await.unwrap(), 2);
        assert!(store.refresh_records(user).iter().all(|r| r.is_revoked()));
        assert!(store.refresh_records(other).iter().all(|r| !r.is_revoked()));
    }

    #[tokio::test]
    async fn test_deactivate_api_key_once() {
        let store = MemoryStore::new();
        let secret = ApiKey::generate_secret();
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: "SMS".to_string(),
            key_hash: ApiKey::hash_secret(&secret),
            key_prefix: ApiKey::display_prefix(&secret),
            permissions: None,
            rate_limit: None,
            active: true,
            expires_at: None,
            rotated_from: None,
            created_by: None,
            created_at: OffsetDateTime::now_utc(),
            revoked_at: None,
            revoke_reason: None,
        };
        ApiKeyStorage::create(&store, &key).await.unwrap();

        assert!(store.deactivate(key.id, "test").await.unwrap());
        assert!(!store.deactivate(key.id, "test").await.unwrap());
        let stored = store.api_key(key.id).unwrap();
        assert!(!stored.active);
        assert_eq!(stored.revoke_reason.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn test_session_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .save("sess:a", &SessionData::default(), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.load("sess:a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.load("sess:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_evicts_abandoned_sessions() {
        let store = MemoryStore::new();
        store
            .save("sess:gone", &SessionData::default(), Duration::from_millis(10))
            .await
            .unwrap();
        store
            .save("sess:kept", &SessionData::default(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Never reloaded, so only the sweep can drop it
        assert_eq!(store.session_count(), 2);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.session_count(), 1);
        assert!(store.load("sess:kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new();
        store
            .save("sess:forever", &SessionData::default(), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert!(store.load("sess:forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_failure_switch() {
        let store = MemoryStore::new();
        store.fail_sessions(true);
        assert!(store.load("sess:a").await.is_err());
        assert_eq!(store.backend_name(), "memory");
    }
}
