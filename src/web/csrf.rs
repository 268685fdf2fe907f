//! # CSRF (Cross-Site Request Forgery) middleware for Axum
//!
//! Adapts [`CsrfGuard`] to an Axum middleware chain and provides a small
//! endpoint for SPA clients to fetch the current token.
//!
//! - [`csrf_protect`] runs [`CsrfGuard::process`] before the inner handler
//!   and [`CsrfGuard::finalize`] after it, so the cookie refresh is applied
//!   even to rejection responses.
//! - When the configured header is absent on a url-encoded form post, the
//!   body is buffered (up to the configured limit) to read the form field,
//!   and handed to the inner handler unchanged.
//! - The included [`csrf_handler`] can be mounted at `/csrf` to issue or
//!   refresh CSRF tokens.
//!
//! # Example
//! ```rust,no_run
//! use axum::{middleware, routing::{get, post}, Router};
//! use wzs_csrf::config::csrf::CsrfConfig;
//! use wzs_csrf::csrf::guard::CsrfGuard;
//! use wzs_csrf::web::csrf::{csrf_handler, csrf_protect};
//!
//! let guard = CsrfGuard::from_config(CsrfConfig::from_env().unwrap());
//! let app: Router = Router::new()
//!     .route("/csrf", get(csrf_handler))
//!     .route("/items", post(|| async { "created" }))
//!     .layer(middleware::from_fn_with_state(guard, csrf_protect));
//! ```

use axum::{
    body::{self, Body, Bytes},
    extract::{Request, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_LENGTH},
        request::Parts,
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use tracing::debug;

use crate::csrf::guard::{CsrfGuard, CsrfToken};

/// Axum middleware enforcing CSRF protection.
///
/// Mount with [`axum::middleware::from_fn_with_state`]. On acceptance the
/// current token is available to handlers as `Extension<CsrfToken>`.
pub async fn csrf_protect(State(guard): State<CsrfGuard>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let config = guard.snapshot();

    let (body, form_token) = match guard.form_field_for(&config, &parts) {
        Some((field, limit)) => read_form_token(&parts, body, &field, limit).await,
        None => (body, None),
    };

    let decision = guard.process_with(config, &parts, form_token.as_deref());

    let mut response = match &decision.outcome {
        Ok(()) => {
            if let Some(token) = &decision.token {
                parts.extensions.insert(CsrfToken(token.clone()));
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Err(rejection) => rejection.into_response(),
    };

    guard.finalize(&mut response, decision);
    response
}

/// Buffers an url-encoded body and extracts `field` from it.
///
/// The body is returned intact for the inner handler. Bodies declared
/// larger than `limit` are passed through without being read.
async fn read_form_token(parts: &Parts, body: Body, field: &str, limit: usize) -> (Body, Option<String>) {
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return (body, None);
    }

    let bytes = match body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(%err, "CSRF form body could not be read");
            return (Body::empty(), None);
        }
    };

    let token = form_field(&bytes, field);
    (Body::from(bytes), token)
}

fn form_field(bytes: &Bytes, field: &str) -> Option<String> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes)
        .ok()?
        .into_iter()
        .find(|(name, _)| name == field)
        .map(|(_, value)| value)
}

/// JSON response schema returned by [`csrf_handler`].
#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

/// Axum handler that returns the current CSRF token.
///
/// Must be mounted behind [`csrf_protect`], which reuses a valid cookie
/// token or issues a new one and sets it in a `Set-Cookie` header.
/// Responds with `404 Not Found` when the guard is disabled.
pub async fn csrf_handler(token: Option<Extension<CsrfToken>>) -> Response {
    let Some(Extension(CsrfToken(csrf_token))) = token else {
        return StatusCode::NOT_FOUND.into_response();
    };

    (
        [(CACHE_CONTROL, "no-store, no-cache, must-revalidate")],
        Json(CsrfResponse { csrf_token }),
    )
        .into_response()
}
