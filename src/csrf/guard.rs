//! # CSRF guard
//!
//! Enforces the double-submit-cookie pattern around a request/response cycle.
//!
//! The guard is framework-neutral and works on [`http`](axum::http) types
//! through two hooks:
//!
//! - [`CsrfGuard::process`] runs before the handler. It checks the cookie,
//!   classifies the request and, for state-changing requests, verifies the
//!   submitted token.
//! - [`CsrfGuard::finalize`] runs after a response exists (including
//!   rejection responses) and attaches the `Set-Cookie` header when the
//!   token was minted, is near expiry, or was reset by the handler.
//!
//! Per request:
//!
//! ```text
//! START -> COOKIE_CHECKED -> (SAFE_METHOD_PASS | VERIFY_PENDING)
//!       -> (ACCEPTED | REJECTED) -> COOKIE_REFRESH_SCHEDULED -> DONE
//! ```
//!
//! See [`crate::web::csrf::csrf_protect`] for the Axum middleware.

use std::sync::Arc;

use axum::http::{
    header::{CONTENT_TYPE, HOST, ORIGIN, REFERER, SET_COOKIE},
    request::Parts,
    uri::{Authority, Scheme},
    HeaderMap, HeaderValue, Response, Uri,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::csrf::{CookieSettings, CsrfConfig, CsrfSettings};
use crate::csrf::codec::{TokenCodec, Verified};
use crate::error::csrf::{CsrfRejection, VerifyError};
use crate::time::clock::Clock;
use crate::time::system_clock::SystemClock;

/// The token valid for the current request, placed in request extensions
/// so handlers can embed it in pages or return it to SPA clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Request extension marking a request as exempt from verification.
///
/// Insert it from an earlier middleware (e.g. for requests authenticated
/// by API key rather than cookies).
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipCsrfCheck;

/// Response extension asking the guard to issue a new token, e.g. after login.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResetCsrfToken;

/// Ephemeral per-request verification record.
#[derive(Clone, Debug, Default)]
pub struct CsrfContext {
    /// Cookie token, `None` when absent or not structurally a token.
    pub cookie_token: Option<String>,
    pub submitted_token: Option<String>,
    pub verification: Option<Result<Verified, VerifyError>>,
}

/// Result of [`CsrfGuard::process`], consumed by [`CsrfGuard::finalize`].
#[derive(Clone, Debug)]
pub struct CsrfDecision {
    pub outcome: Result<(), CsrfRejection>,
    /// Token the client holds after this response; `None` when disabled.
    pub token: Option<String>,
    /// Token to send in `Set-Cookie`, if any.
    pub cookie_to_set: Option<String>,
    config: Arc<CsrfConfig>,
}

impl CsrfDecision {
    pub fn is_accepted(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-request CSRF enforcement.
///
/// Cheap to clone; clones share the same [`CsrfSettings`].
#[derive(Clone)]
pub struct CsrfGuard {
    settings: CsrfSettings,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CsrfGuard {
    pub fn new(settings: CsrfSettings, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    /// Creates a guard over `config` using the system clock.
    pub fn from_config(config: CsrfConfig) -> Self {
        Self::new(CsrfSettings::new(config), Arc::new(SystemClock::new()))
    }

    pub fn settings(&self) -> &CsrfSettings {
        &self.settings
    }

    /// Makes `new_salt` current; tokens signed with the old salt stay valid
    /// for `grace` from now.
    pub fn rotate_salt(&self, new_salt: &str, grace: Duration) {
        let deadline = self.clock.now() + grace;
        self.settings.rotate_salt(new_salt, deadline);
        debug!(grace_expires_at = %deadline, "CSRF salt rotated");
    }

    /// Takes the configuration snapshot a single request is judged against.
    pub fn snapshot(&self) -> Arc<CsrfConfig> {
        self.settings.load()
    }

    /// Returns the form field to read when the submitted token can only
    /// come from an url-encoded body, together with the body size limit.
    pub fn form_field_for(&self, config: &CsrfConfig, parts: &Parts) -> Option<(String, usize)> {
        let needs_form = config.enabled
            && !config.is_safe_method(&parts.method)
            && !self.is_exempt(config, parts)
            && header_token(&parts.headers, &config.header_name).is_none()
            && is_form_urlencoded(&parts.headers);

        needs_form.then(|| (config.form_field_name.clone(), config.form_body_limit))
    }

    /// Runs the request half of the guard.
    ///
    /// `form_token` is the value of the configured form field, when the
    /// caller extracted one. The header always takes precedence.
    pub fn process(&self, parts: &Parts, form_token: Option<&str>) -> CsrfDecision {
        self.process_with(self.snapshot(), parts, form_token)
    }

    /// Same as [`CsrfGuard::process`], judged against an already taken
    /// [`snapshot`](CsrfGuard::snapshot).
    pub fn process_with(
        &self,
        config: Arc<CsrfConfig>,
        parts: &Parts,
        form_token: Option<&str>,
    ) -> CsrfDecision {
        if !config.enabled {
            return CsrfDecision {
                outcome: Ok(()),
                token: None,
                cookie_to_set: None,
                config,
            };
        }

        let codec = TokenCodec::new(config.secret, self.clock.clone());
        let now = self.clock.now();

        // START -> COOKIE_CHECKED
        let mut ctx = CsrfContext {
            cookie_token: cookie_token(&parts.headers, &config.cookie.name),
            ..CsrfContext::default()
        };
        if let Some(cookie) = ctx.cookie_token.as_deref() {
            let verification = codec.verify_with_rotation(
                cookie,
                &config.salt_candidates(),
                config.token_max_age + config.expiry_grace,
            );
            if verification == Err(VerifyError::Malformed) {
                ctx.cookie_token = None;
            } else {
                ctx.verification = Some(verification);
            }
        }

        let refresh = match &ctx.verification {
            Some(Ok(verified)) => needs_refresh(&config, verified, now),
            _ => true,
        };
        let (token, cookie_to_set) = match (&ctx.cookie_token, refresh) {
            (Some(cookie), false) => (cookie.clone(), None),
            _ => {
                let fresh = codec.issue_nonce(&config.salt);
                debug!(had_cookie = ctx.cookie_token.is_some(), "CSRF token issued");
                (fresh.clone(), Some(fresh))
            }
        };

        let outcome = if config.is_safe_method(&parts.method) || self.is_exempt(&config, parts) {
            // SAFE_METHOD_PASS
            Ok(())
        } else {
            // VERIFY_PENDING
            ctx.submitted_token = header_token(&parts.headers, &config.header_name).or_else(|| {
                form_token
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
            });
            verify_request(&config, parts, &ctx)
        };

        if let Err(reason) = &outcome {
            warn!(
                %reason,
                method = %parts.method,
                path = parts.uri.path(),
                "CSRF check failed"
            );
        }

        CsrfDecision {
            outcome,
            token: Some(token),
            cookie_to_set,
            config,
        }
    }

    /// Runs the response half of the guard, attaching `Set-Cookie` when needed.
    pub fn finalize<B>(&self, response: &mut Response<B>, decision: CsrfDecision) {
        let config = decision.config;
        if !config.enabled {
            return;
        }

        let reset = response.extensions_mut().remove::<ResetCsrfToken>().is_some();
        let token = if reset {
            let codec = TokenCodec::new(config.secret, self.clock.clone());
            debug!("CSRF token reset by handler");
            Some(codec.issue_nonce(&config.salt))
        } else {
            decision.cookie_to_set
        };

        let Some(token) = token else {
            return;
        };
        let cookie = csrf_cookie(&config.cookie, token);
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(err) => warn!(%err, "CSRF cookie could not be encoded as a header"),
        }
    }

    fn is_exempt(&self, config: &CsrfConfig, parts: &Parts) -> bool {
        parts.extensions.get::<SkipCsrfCheck>().is_some() || config.is_exempt_path(parts.uri.path())
    }
}

/// Builds the token cookie from [`CookieSettings`].
///
/// # Example
/// ```rust
/// use wzs_csrf::config::csrf::CsrfConfig;
/// use wzs_csrf::csrf::guard::csrf_cookie;
///
/// let cfg = CsrfConfig::new([0u8; 32]);
/// let cookie = csrf_cookie(&cfg.cookie, "v1.token".to_string());
/// assert_eq!(cookie.name(), "csrftoken");
/// assert_eq!(cookie.http_only(), Some(false));
/// ```
pub fn csrf_cookie(settings: &CookieSettings, token: String) -> Cookie<'static> {
    let mut builder = Cookie::build((settings.name.clone(), token))
        .path(settings.path.clone())
        .same_site(settings.same_site)
        .secure(settings.secure)
        .http_only(false)
        .max_age(::time::Duration::seconds(settings.max_age.num_seconds()));
    if let Some(domain) = &settings.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

fn verify_request(config: &CsrfConfig, parts: &Parts, ctx: &CsrfContext) -> Result<(), CsrfRejection> {
    check_referer(config, parts)?;

    let submitted = ctx
        .submitted_token
        .as_deref()
        .ok_or(CsrfRejection::MissingToken)?;
    let cookie = ctx
        .cookie_token
        .as_deref()
        .ok_or(CsrfRejection::MissingToken)?;

    // Both sides must be the very same token, not merely two valid ones.
    if submitted.as_bytes().ct_eq(cookie.as_bytes()).unwrap_u8() != 1 {
        return Err(match TokenCodec::check_format(submitted) {
            Err(err) => err.into(),
            Ok(()) => CsrfRejection::BadSignature,
        });
    }

    match &ctx.verification {
        Some(Ok(_)) => Ok(()),
        Some(Err(err)) => Err((*err).into()),
        None => Err(CsrfRejection::MissingToken),
    }
}

fn needs_refresh(config: &CsrfConfig, verified: &Verified, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(verified.issued_at);
    verified.salt_index > 0
        || age > config.token_max_age
        || config.token_max_age - age < config.refresh_threshold
}

/// Secure-transport requests must come from a secure page of the same
/// origin (or a trusted host).
fn check_referer(config: &CsrfConfig, parts: &Parts) -> Result<(), CsrfRejection> {
    if !config.force_secure_referer || !is_secure(parts) {
        return Ok(());
    }

    let referer = header_str(&parts.headers, REFERER.as_str())
        .or_else(|| header_str(&parts.headers, ORIGIN.as_str()))
        .ok_or(CsrfRejection::RefererMismatch)?;
    let uri: Uri = referer
        .parse()
        .map_err(|_| CsrfRejection::RefererMismatch)?;

    let (Some(scheme), Some(authority)) = (uri.scheme(), uri.authority()) else {
        return Err(CsrfRejection::RefererMismatch);
    };
    if *scheme != Scheme::HTTPS {
        return Err(CsrfRejection::RefererMismatch);
    }

    let referer_host = authority.host().to_ascii_lowercase();
    let same_origin = request_authority(parts).is_some_and(|own| own == normalize(authority));
    let trusted = config.trusted_hosts.iter().any(|h| *h == referer_host);

    if same_origin || trusted {
        Ok(())
    } else {
        Err(CsrfRejection::RefererMismatch)
    }
}

fn is_secure(parts: &Parts) -> bool {
    parts.uri.scheme() == Some(&Scheme::HTTPS)
        || header_str(&parts.headers, "x-forwarded-proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

fn request_authority(parts: &Parts) -> Option<String> {
    match header_str(&parts.headers, HOST.as_str()) {
        Some(host) => host.parse::<Authority>().ok().map(|a| normalize(&a)),
        None => parts.uri.authority().map(normalize),
    }
}

/// Lowercased `host[:port]`, dropping the default HTTPS port.
fn normalize(authority: &Authority) -> String {
    let host = authority.host().to_ascii_lowercase();
    match authority.port_u16() {
        None | Some(443) => host,
        Some(port) => format!("{host}:{port}"),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn header_token(headers: &HeaderMap, name: &str) -> Option<String> {
    header_str(headers, name).map(str::to_string)
}

fn cookie_token(headers: &HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn is_form_urlencoded(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE.as_str()).is_some_and(|ct| {
        ct.split(';')
            .next()
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
    })
}
