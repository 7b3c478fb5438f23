//! Helpers for reading configuration from environment variables.

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Trim a value and discard it when empty.
pub fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read a non-empty environment variable.
pub fn env_string(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().and_then(non_empty)
}

/// Read and parse an environment variable, if set.
pub fn parse_env<T>(var_name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env_string(var_name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            ConfigError::Invalid(format!("invalid value for {var_name}={raw}: {e}"))
        }),
        None => Ok(None),
    }
}

/// Read a boolean environment variable, if set.
pub fn parse_bool_env(var_name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = env_string(var_name) else {
        return Ok(None);
    };

    let normalized = v.to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(ConfigError::Invalid(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_trims() {
        assert_eq!(non_empty("  queue ".to_string()), Some("queue".to_string()));
        assert_eq!(non_empty("   ".to_string()), None);
    }
}
