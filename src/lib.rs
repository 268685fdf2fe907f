//! # wzs_csrf
//!
//! CSRF protection for Axum applications using the double-submit-cookie
//! pattern with signed, time-limited tokens.
//!
//! This crate provides:
//! - Token signing and verification with salt rotation (`csrf::codec`)
//! - A framework-neutral request/response guard (`csrf::guard`)
//! - Axum middleware and a token endpoint (`web::csrf`)
//! - Environment-driven configuration with atomic salt rotation (`config`)
//!
//! ## Example usage (in another crate)
//!
//! ```rust,no_run
//! use wzs_csrf::axum::{middleware, routing::get, Router};
//! use wzs_csrf::config::app::AppConfig;
//! use wzs_csrf::csrf::guard::CsrfGuard;
//! use wzs_csrf::web::csrf::{csrf_handler, csrf_protect};
//!
//! # fn main() -> wzs_csrf::anyhow::Result<()> {
//! let cfg = AppConfig::from_env()?;
//! let guard = CsrfGuard::from_config(cfg.csrf);
//! let app: Router = Router::new()
//!     .route("/csrf", get(csrf_handler))
//!     .layer(middleware::from_fn_with_state(guard, csrf_protect));
//! # Ok(())
//! # }
//! ```

// ===============================
// Re-exports of external crates
// ===============================

pub use anyhow;
pub use arc_swap;
pub use axum;
pub use axum_extra;
pub use base64;
pub use chrono;
pub use dotenvy;
pub use hmac;
pub use rand;
pub use serde;
pub use serde_json;
pub use sha2;
pub use subtle;
pub use tokio;
pub use tower;

// ===============================
// Public modules
// ===============================
pub mod config;
pub mod csrf;
pub mod error;
pub mod time;
pub mod web;
