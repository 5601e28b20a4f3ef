//! Environment variable parsing utilities
//!
//! Small helpers shared by every `from_env` constructor in the workspace so
//! that configuration loading never has to unwrap.

use std::str::FromStr;

/// Parse an environment variable, falling back to `default` when it is
/// missing or does not parse.
///
/// # Example
/// ```ignore
/// let retries: u32 = parse_env_with_default("DB_CONNECT_RETRIES", 30);
/// ```
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    parse_env_optional(key).unwrap_or(default)
}

/// Parse an environment variable, returning `None` if missing or invalid.
pub fn parse_env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read a required environment variable.
///
/// Unlike [`parse_env_with_default`], a value that is present but fails to
/// parse is reported instead of silently replaced.
pub fn parse_env_required<T: FromStr>(key: &str) -> Result<T, String> {
    let raw = std::env::var(key).map_err(|_| format!("{} environment variable not set", key))?;
    raw.trim()
        .parse()
        .map_err(|_| format!("Failed to parse environment variable {}", key))
}

/// Read a string variable, treating empty values as unset.
pub fn env_string_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}
