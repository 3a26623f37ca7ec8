//! Authentication and authorization configuration.
//!
//! All sections use `#[serde(default)]`, so a partial TOML document only needs
//! to set the values that differ from the defaults. Durations are written in
//! humantime form (`"24h"`, `"15m"`).
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth.token]
//! secret = "change-me-to-a-long-random-string"
//! access_token_lifetime = "24h"
//!
//! [auth.session]
//! secure = true
//! same_site = "strict"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root authentication and authorization configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token signing and lifetime settings.
    pub token: TokenConfig,

    /// Server-side session settings.
    pub session: SessionConfig,

    /// Credential store call settings.
    pub store: StoreConfig,

    /// Per-role request budgets.
    pub rate_limiting: RateLimitingConfig,

    /// Audit log settings.
    pub audit: AuditConfig,

    /// Password policy.
    pub password: PasswordConfig,
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC secret used to sign access and refresh tokens.
    pub secret: String,

    /// Value of the `iss` claim.
    pub issuer: String,

    /// Value of the `aud` claim.
    pub audience: String,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "pedro-dental-api".to_string(),
            audience: "pedro-dental-clients".to_string(),
            access_token_lifetime: Duration::from_secs(24 * 3600),
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// `SameSite` attribute for the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

/// Server-side session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session id.
    pub cookie_name: String,

    /// Namespace prefix for keys in the session store.
    pub key_prefix: String,

    /// Session lifetime, renewed on every touch.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Age after which the session id is forcibly regenerated.
    #[serde(with = "humantime_serde")]
    pub regenerate_after: Duration,

    /// Mark the cookie `Secure`.
    pub secure: bool,

    /// Mark the cookie `HttpOnly`.
    pub http_only: bool,

    /// Cookie `SameSite` policy.
    pub same_site: SameSitePolicy,

    /// Cookie path.
    pub path: String,

    /// Optional cookie domain.
    pub domain: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "pedro.sid".to_string(),
            key_prefix: "sess:".to_string(),
            ttl: Duration::from_secs(24 * 3600),
            regenerate_after: Duration::from_secs(6 * 3600),
            secure: false,
            http_only: true,
            same_site: SameSitePolicy::Lax,
            path: "/".to_string(),
            domain: None,
        }
    }
}

/// Credential store call settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on any single identity, API-key, ownership or session lookup.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Per-role request budgets over a shared window.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Enforce budgets in the request pipeline.
    pub enabled: bool,

    /// Fixed window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    pub super_admin: u32,
    pub admin: u32,
    pub doctor: u32,
    pub staff: u32,
    pub patient: u32,
    pub api_client: u32,

    /// Budget for requests with no resolved role.
    pub anonymous: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(15 * 60),
            super_admin: 1000,
            admin: 500,
            doctor: 300,
            staff: 300,
            patient: 100,
            api_client: 200,
            anonymous: 50,
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Write audit records for guarded requests.
    pub enabled: bool,

    /// Metadata keys whose values are replaced before persisting.
    pub redact_fields: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_fields: [
                "password",
                "currentPassword",
                "newPassword",
                "token",
                "refreshToken",
                "api_key",
                "apiKey",
                "secret",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Password policy applied on password change.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordConfig {
    pub min_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

/// Shortest signing secret accepted by [`AuthConfig::validate`].
pub const MIN_SECRET_LEN: usize = 32;

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the signing secret is unset, and
    /// `ConfigError::InvalidValue` for short secrets, empty issuer/audience,
    /// zero lifetimes or timeouts, or a regeneration age that is not shorter
    /// than the session ttl.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.secret.is_empty() {
            return Err(ConfigError::Missing("token.secret".to_string()));
        }

        if self.token.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "token.secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }

        if self.token.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "token.issuer cannot be empty".to_string(),
            ));
        }

        if self.token.audience.is_empty() {
            return Err(ConfigError::InvalidValue(
                "token.audience cannot be empty".to_string(),
            ));
        }

        if self.token.access_token_lifetime.is_zero() || self.token.refresh_token_lifetime.is_zero()
        {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be > 0".to_string(),
            ));
        }

        if self.session.cookie_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "session.cookie_name cannot be empty".to_string(),
            ));
        }

        if self.session.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.ttl must be > 0".to_string(),
            ));
        }

        if self.session.regenerate_after >= self.session.ttl {
            return Err(ConfigError::InvalidValue(
                "session.regenerate_after must be shorter than session.ttl".to_string(),
            ));
        }

        if self.session.same_site == SameSitePolicy::None && !self.session.secure {
            return Err(ConfigError::InvalidValue(
                "session.same_site = \"none\" requires session.secure".to_string(),
            ));
        }

        if self.store.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "store.timeout must be > 0".to_string(),
            ));
        }

        if self.rate_limiting.enabled && self.rate_limiting.window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "rate_limiting.window must be > 0".to_string(),
            ));
        }

        if self.password.min_length == 0 {
            return Err(ConfigError::InvalidValue(
                "password.min_length must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.token.secret = "x".repeat(MIN_SECRET_LEN);
        config
    }

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.token.issuer, "pedro-dental-api");
        assert_eq!(config.token.audience, "pedro-dental-clients");
        assert_eq!(config.token.access_token_lifetime, Duration::from_secs(86_400));
        assert_eq!(
            config.token.refresh_token_lifetime,
            Duration::from_secs(7 * 86_400)
        );
        assert_eq!(config.session.cookie_name, "pedro.sid");
        assert_eq!(config.session.regenerate_after, Duration::from_secs(6 * 3600));
        assert_eq!(config.rate_limiting.window, Duration::from_secs(900));
    }

    #[test]
    fn test_missing_secret_fails_validation() {
        let err = AuthConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("token.secret"));
    }

    #[test]
    fn test_configured_secret_validates() {
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_short_secret_fails_validation() {
        let mut config = configured();
        config.token.secret = "short".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue(_)
        ));
    }

    #[test]
    fn test_regenerate_after_must_be_shorter_than_ttl() {
        let mut config = configured();
        config.session.regenerate_after = config.session.ttl;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("regenerate_after"));
    }

    #[test]
    fn test_same_site_none_requires_secure() {
        let mut config = configured();
        config.session.same_site = SameSitePolicy::None;
        assert!(config.validate().is_err());
        config.session.secure = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_store_timeout_fails_validation() {
        let mut config = configured();
        config.store.timeout = Duration::ZERO;
        assert!(config.validate().unwrap_err().to_string().contains("store.timeout"));
    }

    #[test]
    fn test_default_redacted_fields() {
        let config = AuditConfig::default();
        assert!(config.redact_fields.iter().any(|f| f == "password"));
        assert!(config.redact_fields.iter().any(|f| f == "refreshToken"));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "token": { "secret": "s".repeat(40), "access_token_lifetime": "1h" },
            "session": { "same_site": "strict", "secure": true }
        }))
        .unwrap();
        assert_eq!(config.token.access_token_lifetime, Duration::from_secs(3600));
        assert_eq!(config.token.issuer, "pedro-dental-api");
        assert_eq!(config.session.same_site, SameSitePolicy::Strict);
        assert!(config.validate().is_ok());
    }
}
