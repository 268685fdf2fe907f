//! # CSRF Configuration
//!
//! Provides configuration for CSRF (Cross-Site Request Forgery) protection:
//! secret and salt management, token lifetimes, request classification and
//! cookie attributes.
//!
//! A loaded [`CsrfConfig`] is immutable. Salt rotation goes through
//! [`CsrfSettings`], which swaps the whole configuration atomically so a
//! request never sees a current salt without its matching grace deadline.
//!
//! The configuration reads from environment variables:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CSRF_ENABLED` | Turns enforcement on | `false` |
//! | `CSRF_SECRET` / `SECRET_KEY` | Signing secret (required when enabled) | random |
//! | `CSRF_SECRET_SALT` | Current signing salt | `csrf-token` |
//! | `CSRF_SECRET_SALT_PREVIOUS` | Rotated-out salt still accepted | *none* |
//! | `CSRF_SECRET_SALT_GRACE_SECS` | How long the previous salt is accepted | `3600` |
//! | `CSRF_TOKEN_MAX_AGE` | Token validity in seconds | `604800` |
//! | `CSRF_TOKEN_EXPIRY_GRACE` | Seconds an expired token is still accepted (and rotated) | `0` |
//! | `CSRF_TOKEN_REFRESH_THRESHOLD` | Refresh when remaining lifetime drops below | `3600` |
//! | `CSRF_COOKIE_NAME` | Cookie holding the token | `csrftoken` |
//! | `CSRF_HEADER_NAME` | Header carrying the submitted token | `X-CSRFToken` |
//! | `CSRF_FORM_FIELD_NAME` | Fallback url-encoded form field | `csrf_token` |
//! | `CSRF_FORM_BODY_LIMIT` | Max form body buffered for the fallback | `1048576` |
//! | `CSRF_SAFE_METHODS` | Methods exempt from enforcement | `GET,HEAD,OPTIONS,TRACE` |
//! | `CSRF_EXEMPT_PATHS` | Path prefixes exempt from enforcement | *none* |
//! | `CSRF_FORCE_SECURE_REFERER` | Check Referer/Origin on secure requests | `false` |
//! | `CSRF_TRUSTED_HOSTS` | Extra Referer hosts accepted | *none* |
//! | `CSRF_COOKIE_SECURE` | `Secure` cookie flag | `true` |
//! | `CSRF_COOKIE_SAMESITE` | `Lax`, `Strict` or `None` | `Lax` |
//! | `CSRF_COOKIE_DOMAIN` | Cookie domain | *none* |
//! | `CSRF_COOKIE_PATH` | Cookie path | `/` |
//! | `CSRF_COOKIE_MAX_AGE` | Cookie max-age in seconds | token max age |
//!
//! # Examples
//! ```rust
//! use wzs_csrf::config::csrf::CsrfConfig;
//!
//! let cfg = CsrfConfig::from_env_with(|_| None).unwrap();
//! assert!(!cfg.enabled);
//! assert!(cfg.cookie.secure);
//! assert_eq!(cfg.secret.len(), 32);
//! ```

use std::env as std_env;
use std::sync::Arc;

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use axum::http::Method;
use axum_extra::extract::cookie::SameSite;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::env::{
    read_flag_from, read_list_from, read_string_from, read_u64_from,
};
use crate::csrf::codec::SaltCandidate;

pub const DEFAULT_COOKIE_NAME: &str = "csrftoken";
pub const DEFAULT_HEADER_NAME: &str = "X-CSRFToken";
pub const DEFAULT_FORM_FIELD_NAME: &str = "csrf_token";
pub const DEFAULT_SALT: &str = "csrf-token";
pub const DEFAULT_TOKEN_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 7;
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 60 * 60;
pub const DEFAULT_SALT_GRACE_SECS: u64 = 60 * 60;
pub const DEFAULT_FORM_BODY_LIMIT: usize = 1024 * 1024;

// Upper bound for any configured duration (100 years); keeps date arithmetic in range.
const MAX_DURATION_SECS: u64 = 60 * 60 * 24 * 365 * 100;

/// A rotated-out salt that is still accepted for verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviousSalt {
    pub salt: String,
    /// Tokens signed with `salt` are rejected once `now` passes this instant.
    pub grace_expires_at: DateTime<Utc>,
}

/// Attributes of the cookie carrying the token.
///
/// `HttpOnly` is never set: client-side code must read the cookie to echo
/// it back in the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age: Duration,
}

/// Configuration for CSRF protection.
///
/// # Example
/// ```rust
/// use wzs_csrf::config::csrf::{derive_secret_from_string, CsrfConfig};
///
/// let mut cfg = CsrfConfig::new(derive_secret_from_string("k"));
/// cfg.enabled = true;
/// assert_eq!(cfg.salt, "csrf-token");
/// assert!(cfg.previous_salt.is_none());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct CsrfConfig {
    pub enabled: bool,
    pub secret: [u8; 32],
    /// Salt used for issuing and verifying tokens.
    pub salt: String,
    /// Salt accepted for verification only, until its grace deadline.
    pub previous_salt: Option<PreviousSalt>,
    pub token_max_age: Duration,
    pub expiry_grace: Duration,
    pub refresh_threshold: Duration,
    pub header_name: String,
    pub form_field_name: String,
    pub form_body_limit: usize,
    pub safe_methods: Vec<Method>,
    pub exempt_paths: Vec<String>,
    pub force_secure_referer: bool,
    pub trusted_hosts: Vec<String>,
    pub cookie: CookieSettings,
}

// The signing secret is never printed.
impl std::fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("enabled", &self.enabled)
            .field("secret", &"<redacted>")
            .field("salt", &self.salt)
            .field("previous_salt", &self.previous_salt)
            .field("token_max_age", &self.token_max_age)
            .field("expiry_grace", &self.expiry_grace)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("header_name", &self.header_name)
            .field("form_field_name", &self.form_field_name)
            .field("form_body_limit", &self.form_body_limit)
            .field("safe_methods", &self.safe_methods)
            .field("exempt_paths", &self.exempt_paths)
            .field("force_secure_referer", &self.force_secure_referer)
            .field("trusted_hosts", &self.trusted_hosts)
            .field("cookie", &self.cookie)
            .finish()
    }
}

impl CsrfConfig {
    /// Creates a configuration with default settings and the given secret.
    ///
    /// Enforcement is disabled until `enabled` is set.
    pub fn new(secret: [u8; 32]) -> Self {
        let token_max_age = seconds(DEFAULT_TOKEN_MAX_AGE_SECS);
        Self {
            enabled: false,
            secret,
            salt: DEFAULT_SALT.to_string(),
            previous_salt: None,
            token_max_age,
            expiry_grace: Duration::zero(),
            refresh_threshold: seconds(DEFAULT_REFRESH_THRESHOLD_SECS),
            header_name: DEFAULT_HEADER_NAME.to_string(),
            form_field_name: DEFAULT_FORM_FIELD_NAME.to_string(),
            form_body_limit: DEFAULT_FORM_BODY_LIMIT,
            safe_methods: default_safe_methods(),
            exempt_paths: Vec::new(),
            force_secure_referer: false,
            trusted_hosts: Vec::new(),
            cookie: CookieSettings {
                name: DEFAULT_COOKIE_NAME.to_string(),
                path: "/".to_string(),
                domain: None,
                secure: true,
                same_site: SameSite::Lax,
                max_age: token_max_age,
            },
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// # Errors
    /// Fails when enforcement is enabled without a secret, or when a
    /// value such as `CSRF_COOKIE_SAMESITE` cannot be parsed. This is meant
    /// to be called once at startup.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|k| std_env::var(k).ok())
    }

    /// Loads configuration using a custom key provider (for testing/mocking).
    pub fn from_env_with<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = read_flag_from(&get, "CSRF_ENABLED", false);

        let secret = match read_string_from(&get, "CSRF_SECRET")
            .or_else(|| read_string_from(&get, "SECRET_KEY"))
        {
            Some(s) => derive_secret_from_string(&s),
            None if enabled => {
                bail!("CSRF_ENABLED is set but neither CSRF_SECRET nor SECRET_KEY is configured")
            }
            None => random_secret(),
        };

        let mut cfg = Self::new(secret);
        cfg.enabled = enabled;

        if let Some(salt) = read_string_from(&get, "CSRF_SECRET_SALT") {
            cfg.salt = salt;
        }
        cfg.previous_salt = read_string_from(&get, "CSRF_SECRET_SALT_PREVIOUS")
            .filter(|prev| *prev != cfg.salt)
            .map(|salt| {
                let grace = seconds(read_u64_from(
                    &get,
                    "CSRF_SECRET_SALT_GRACE_SECS",
                    DEFAULT_SALT_GRACE_SECS,
                ));
                PreviousSalt {
                    salt,
                    grace_expires_at: Utc::now() + grace,
                }
            });

        cfg.token_max_age = seconds(read_u64_from(
            &get,
            "CSRF_TOKEN_MAX_AGE",
            DEFAULT_TOKEN_MAX_AGE_SECS,
        ));
        cfg.expiry_grace = seconds(read_u64_from(&get, "CSRF_TOKEN_EXPIRY_GRACE", 0));
        cfg.refresh_threshold = seconds(read_u64_from(
            &get,
            "CSRF_TOKEN_REFRESH_THRESHOLD",
            DEFAULT_REFRESH_THRESHOLD_SECS,
        ));

        if let Some(name) = read_string_from(&get, "CSRF_HEADER_NAME") {
            cfg.header_name = name;
        }
        if let Some(name) = read_string_from(&get, "CSRF_FORM_FIELD_NAME") {
            cfg.form_field_name = name;
        }
        cfg.form_body_limit = usize::try_from(read_u64_from(
            &get,
            "CSRF_FORM_BODY_LIMIT",
            DEFAULT_FORM_BODY_LIMIT as u64,
        ))
        .unwrap_or(DEFAULT_FORM_BODY_LIMIT);

        if let Some(methods) = read_list_from(&get, "CSRF_SAFE_METHODS") {
            cfg.safe_methods = parse_methods(&methods)?;
        }
        cfg.exempt_paths = read_list_from(&get, "CSRF_EXEMPT_PATHS").unwrap_or_default();
        cfg.force_secure_referer = read_flag_from(&get, "CSRF_FORCE_SECURE_REFERER", false);
        cfg.trusted_hosts = read_list_from(&get, "CSRF_TRUSTED_HOSTS")
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();

        if let Some(name) = read_string_from(&get, "CSRF_COOKIE_NAME") {
            cfg.cookie.name = name;
        }
        if let Some(path) = read_string_from(&get, "CSRF_COOKIE_PATH") {
            cfg.cookie.path = path;
        }
        cfg.cookie.domain = read_string_from(&get, "CSRF_COOKIE_DOMAIN");
        cfg.cookie.secure = read_flag_from(&get, "CSRF_COOKIE_SECURE", true);
        if let Some(same_site) = read_string_from(&get, "CSRF_COOKIE_SAMESITE") {
            cfg.cookie.same_site = parse_same_site(&same_site)?;
        }
        cfg.cookie.max_age = match read_string_from(&get, "CSRF_COOKIE_MAX_AGE") {
            Some(_) => seconds(read_u64_from(
                &get,
                "CSRF_COOKIE_MAX_AGE",
                DEFAULT_TOKEN_MAX_AGE_SECS,
            )),
            None => cfg.token_max_age,
        };

        Ok(cfg)
    }

    /// Returns `true` if CSRF protection should be enforced.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` if `method` is exempt from token verification.
    pub fn is_safe_method(&self, method: &Method) -> bool {
        self.safe_methods.contains(method)
    }

    /// Returns `true` if `path` falls under one of the exempt prefixes.
    pub fn is_exempt_path(&self, path: &str) -> bool {
        self.exempt_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Salts accepted for verification, current salt first.
    pub fn salt_candidates(&self) -> Vec<SaltCandidate<'_>> {
        let mut salts = vec![SaltCandidate::current(&self.salt)];
        if let Some(prev) = &self.previous_salt {
            salts.push(SaltCandidate::until(&prev.salt, prev.grace_expires_at));
        }
        salts
    }

    /// Returns a copy with `new_salt` as current salt and the old current
    /// salt accepted until `grace_expires_at`.
    pub fn rotated(&self, new_salt: impl Into<String>, grace_expires_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.previous_salt = Some(PreviousSalt {
            salt: self.salt.clone(),
            grace_expires_at,
        });
        next.salt = new_salt.into();
        next
    }
}

/// Shared, atomically replaceable [`CsrfConfig`].
///
/// Readers take a snapshot with [`CsrfSettings::load`] and use it for the
/// whole request. Writers replace the entire configuration.
///
/// # Example
/// ```rust
/// use chrono::{Duration, Utc};
/// use wzs_csrf::config::csrf::{derive_secret_from_string, CsrfConfig, CsrfSettings};
///
/// let settings = CsrfSettings::new(CsrfConfig::new(derive_secret_from_string("k")));
/// settings.rotate_salt("salt-2", Utc::now() + Duration::hours(1));
///
/// let snapshot = settings.load();
/// assert_eq!(snapshot.salt, "salt-2");
/// assert_eq!(snapshot.previous_salt.as_ref().unwrap().salt, "csrf-token");
/// ```
#[derive(Clone, Debug)]
pub struct CsrfSettings {
    inner: Arc<ArcSwap<CsrfConfig>>,
}

impl CsrfSettings {
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Returns the current configuration snapshot.
    pub fn load(&self) -> Arc<CsrfConfig> {
        self.inner.load_full()
    }

    /// Replaces the whole configuration.
    pub fn replace(&self, config: CsrfConfig) {
        self.inner.store(Arc::new(config));
    }

    /// Makes `new_salt` current and keeps the old salt valid until
    /// `grace_expires_at`. Any older previous salt is dropped.
    pub fn rotate_salt(&self, new_salt: &str, grace_expires_at: DateTime<Utc>) {
        self.inner
            .rcu(|current| current.rotated(new_salt, grace_expires_at));
    }
}

/// Converts whole seconds into a [`Duration`], capped to a sane range.
pub fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

fn default_safe_methods() -> Vec<Method> {
    vec![Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE]
}

fn parse_methods(raw: &[String]) -> Result<Vec<Method>> {
    raw.iter()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| anyhow::anyhow!("Invalid HTTP method in CSRF_SAFE_METHODS: {m}"))
        })
        .collect()
}

fn parse_same_site(raw: &str) -> Result<SameSite> {
    match raw.to_ascii_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        other => bail!("Invalid CSRF_COOKIE_SAMESITE value: {other}"),
    }
}

/// Derives a deterministic 32-byte secret key from a string.
///
/// Useful for converting an environment string (e.g. `CSRF_SECRET`)
/// into a fixed-length HMAC key.
pub fn derive_secret_from_string(s: &str) -> [u8; 32] {
    let digest = Sha256::digest(s.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest[..32]);
    key
}

/// Generates a new random 32-byte secret key.
pub fn random_secret() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}
