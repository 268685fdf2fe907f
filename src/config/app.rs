//! # Application Configuration Loader
//!
//! Loads the application environment and the CSRF configuration in one step.
//!
//! Automatically loads `.env` files for non-production environments.
//! It checks for a custom `DOTENV_FILE` path first, then falls back to
//! `.env.{APP_ENV}` or `.env`.
//!
//! # Environment Variables
//! | Variable | Description | Default |
//! |-----------|-------------|----------|
//! | `APP_ENV` | Current environment (`development`, `production`, etc.) | `"development"` |
//! | `DOTENV_FILE` | Optional path to a custom dotenv file | *none* |
//! | `CSRF_*` | See [`crate::config::csrf`] | |
//!
//! # Example
//! ```rust,no_run
//! use wzs_csrf::config::app::AppConfig;
//!
//! let cfg = AppConfig::from_env().expect("invalid configuration");
//! if cfg.is_csrf_enabled() {
//!     println!("CSRF protection is active");
//! }
//! ```

use std::env;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::csrf::CsrfConfig;

/// Top-level application configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Value of `APP_ENV`.
    pub app_env: String,
    pub csrf: CsrfConfig,
}

impl AppConfig {
    /// Loads application configuration from environment variables.
    ///
    /// ## Behavior
    /// - Reads `APP_ENV` (defaults to `"development"`).
    /// - Loads `.env` or `.env.{APP_ENV}` for non-production environments.
    /// - Fails if the CSRF settings are inconsistent.
    pub fn from_env() -> Result<Self> {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".into());

        if app_env != "production" {
            if let Ok(path) = env::var("DOTENV_FILE") {
                let _ = dotenvy::from_filename(path);
            } else {
                let candidate = format!(".env.{}", app_env);
                dotenvy::from_filename(&candidate)
                    .or_else(|_| dotenvy::dotenv())
                    .ok();
            }
        }

        let csrf = CsrfConfig::from_env().context("invalid CSRF configuration")?;
        info!(app_env = %app_env, csrf_enabled = csrf.enabled, "configuration loaded");

        Ok(AppConfig { app_env, csrf })
    }

    /// Returns `true` if CSRF protection is enabled (`CSRF_ENABLED`).
    pub fn is_csrf_enabled(&self) -> bool {
        self.csrf.is_enabled()
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_env;

    #[test]
    fn defaults_to_development_with_csrf_disabled() {
        temp_env::with_vars(
            vec![
                ("APP_ENV", None::<&str>),
                ("DOTENV_FILE", Some("/nonexistent/.env.test")),
                ("CSRF_ENABLED", None),
            ],
            || {
                let cfg = AppConfig::from_env().unwrap();
                assert_eq!(cfg.app_env, "development");
                assert!(!cfg.is_production());
                assert!(!cfg.is_csrf_enabled());
            },
        );
    }

    #[test]
    fn is_csrf_enabled_when_flag_and_secret_present() {
        temp_env::with_vars(
            vec![
                ("APP_ENV", Some("production")),
                ("CSRF_ENABLED", Some("true")),
                ("CSRF_SECRET", Some("super-secret-key")),
            ],
            || {
                let cfg = AppConfig::from_env().unwrap();
                assert!(cfg.is_production());
                assert!(
                    cfg.is_csrf_enabled(),
                    "Expected CSRF to be enabled when CSRF_ENABLED is set"
                );
            },
        );
    }

    #[test]
    fn debug_does_not_leak_the_csrf_secret() {
        temp_env::with_vars(
            vec![
                ("APP_ENV", Some("production")),
                ("CSRF_ENABLED", Some("true")),
                ("CSRF_SECRET", Some("super-secret-key")),
            ],
            || {
                let cfg = AppConfig::from_env().unwrap();
                let rendered = format!("{cfg:?}");
                assert!(!rendered.contains(&format!("{:?}", cfg.csrf.secret)));
                assert!(rendered.contains("<redacted>"));
            },
        );
    }

    #[test]
    fn enabled_without_secret_is_an_error() {
        temp_env::with_vars(
            vec![
                ("APP_ENV", Some("production")),
                ("CSRF_ENABLED", Some("1")),
                ("CSRF_SECRET", None::<&str>),
                ("SECRET_KEY", None),
            ],
            || {
                let err = AppConfig::from_env().unwrap_err();
                assert!(format!("{err:#}").contains("CSRF_SECRET"));
            },
        );
    }
}
