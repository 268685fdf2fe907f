//! # CSRF error types
//!
//! - [`VerifyError`]: why a single token failed signature or expiry checks.
//! - [`CsrfRejection`]: why the guard refused a request.
//!
//! Every variant is an expected, client-triggerable condition. The detailed
//! reason is meant for server-side logs; the HTTP response produced by
//! [`CsrfRejection`] is identical for all of them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Message returned to clients for every rejection.
pub const REJECTION_MESSAGE: &str = "CSRF token missing or invalid";

/// Failure of [`TokenCodec`](crate::csrf::codec::TokenCodec) verification.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// Not structurally a token: wrong version, bad base64 or truncated.
    #[error("malformed token")]
    Malformed,
    /// Signature does not match any accepted salt.
    #[error("bad token signature")]
    BadSignature,
    /// Signature is valid but the token is older than the allowed age.
    #[error("token expired")]
    Expired,
}

/// Reason the guard rejected a state-changing request.
///
/// # Example
/// ```
/// use wzs_csrf::error::csrf::{CsrfRejection, VerifyError};
///
/// let reason: CsrfRejection = VerifyError::Expired.into();
/// assert_eq!(reason, CsrfRejection::Expired);
/// assert_eq!(reason.to_string(), "CSRF token expired");
/// ```
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CsrfRejection {
    #[error("CSRF token missing")]
    MissingToken,
    #[error("CSRF token signature mismatch")]
    BadSignature,
    #[error("CSRF token expired")]
    Expired,
    #[error("CSRF token malformed")]
    Malformed,
    #[error("Referer checking failed")]
    RefererMismatch,
}

impl From<VerifyError> for CsrfRejection {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Malformed => Self::Malformed,
            VerifyError::BadSignature => Self::BadSignature,
            VerifyError::Expired => Self::Expired,
        }
    }
}

impl IntoResponse for CsrfRejection {
    fn into_response(self) -> Response {
        // The reason stays out of the body so clients get no oracle on the signing scheme.
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": REJECTION_MESSAGE })),
        )
            .into_response()
    }
}
