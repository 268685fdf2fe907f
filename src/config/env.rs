//! # Environment Variable Utilities
//!
//! Provides helpers for reading environment variables with common type conversions.
//! Includes parsing for boolean flags, numeric values and comma-separated lists
//! with fallback defaults.
//!
//! Every reader has a `*_from` variant taking a provider closure, so configuration
//! loading can be tested without touching the process environment.
//!
//! # Examples
//! ```rust,no_run
//! use wzs_csrf::config::env::{read_flag, read_u64};
//!
//! let enabled = read_flag("CSRF_ENABLED", false);
//! let max_age = read_u64("CSRF_TOKEN_MAX_AGE", 604_800);
//! ```

/// Reads a boolean flag from an environment variable.
///
/// Returns `true` for any of the following case-insensitive values:
/// `"1"`, `"true"`, `"yes"`, `"on"`.
pub fn read_flag(name: &str, default: bool) -> bool {
    read_flag_from(|k| std::env::var(k).ok(), name, default)
}

/// Reads a boolean flag using a custom provider function.
///
/// # Example
/// ```rust
/// use wzs_csrf::config::env::read_flag_from;
///
/// let val = read_flag_from(|_| Some("true".into()), "CSRF_ENABLED", false);
/// assert!(val);
/// ```
pub fn read_flag_from<F>(provider: F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match provider(name) {
        Some(v) => is_truthy(&v),
        None => default,
    }
}

/// Returns `true` if a string represents a truthy value.
///
/// Surrounding whitespace and quotes are ignored.
pub fn is_truthy(s: &str) -> bool {
    let s = s.trim().trim_matches(|c| c == '"' || c == '\'');
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Reads an unsigned integer (`u64`) from an environment variable,
/// returning the provided default if it is missing or unparsable.
pub fn read_u64(name: &str, default: u64) -> u64 {
    read_u64_from(|k| std::env::var(k).ok(), name, default)
}

/// Reads a `u64` using a custom provider function.
///
/// # Example
/// ```rust
/// use wzs_csrf::config::env::read_u64_from;
///
/// assert_eq!(read_u64_from(|_| Some(" 600 ".into()), "MAX_AGE", 10), 600);
/// assert_eq!(read_u64_from(|_| Some("soon".into()), "MAX_AGE", 10), 10);
/// ```
pub fn read_u64_from<F>(provider: F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    provider(name)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Reads a trimmed, non-empty string value.
pub fn read_string_from<F>(provider: F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    provider(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Reads a comma-separated list. Empty entries are dropped.
///
/// Returns `None` when the variable is not set at all, so callers can
/// distinguish "unset" (use defaults) from "set to empty" (no entries).
pub fn read_list_from<F>(provider: F, name: &str) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    provider(name).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_flag_true_variants() {
        for val in ["1", "true", "TRUE", "yes", "YES", "on", "On"] {
            let got = read_flag_from(|_| Some(val.into()), "X", false);
            assert!(got, "Expected {val:?} to be truthy");
        }
    }

    #[test]
    fn test_read_flag_false_variants() {
        for val in ["0", "false", "no", "off", "xyz", ""] {
            let got = read_flag_from(|_| Some(val.into()), "X", true);
            assert!(!got, "Expected {val:?} to be falsy");
        }
    }

    #[test]
    fn test_read_flag_default_when_missing() {
        assert!(read_flag_from(|_| None, "X", true));
        assert!(!read_flag_from(|_| None, "X", false));
    }

    #[test]
    fn test_read_flag_strips_quotes() {
        assert!(read_flag_from(|_| Some("\"true\"".into()), "X", false));
        assert!(read_flag_from(|_| Some("'yes'".into()), "X", false));
    }

    #[test]
    fn test_read_u64_invalid_or_missing() {
        assert_eq!(read_u64_from(|_| Some("42".into()), "LIMIT", 10), 42);
        assert_eq!(read_u64_from(|_| Some("-1".into()), "LIMIT", 99), 99);
        assert_eq!(read_u64_from(|_| None, "LIMIT", 77), 77);
    }

    #[test]
    fn test_read_string_ignores_blank() {
        assert_eq!(
            read_string_from(|_| Some("  salt ".into()), "S"),
            Some("salt".to_string())
        );
        assert_eq!(read_string_from(|_| Some("   ".into()), "S"), None);
        assert_eq!(read_string_from(|_| None, "S"), None);
    }

    #[test]
    fn test_read_list_splits_and_trims() {
        let got = read_list_from(|_| Some(" GET, ,HEAD ,OPTIONS".into()), "L");
        assert_eq!(
            got,
            Some(vec!["GET".to_string(), "HEAD".into(), "OPTIONS".into()])
        );

        assert_eq!(read_list_from(|_| Some("".into()), "L"), Some(vec![]));
        assert_eq!(read_list_from(|_| None, "L"), None);
    }
}
