use std::str::FromStr;

use thiserror::Error;

use crate::env::get_env_opt;

/// Errors related to application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is set but its value cannot be parsed.
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// Raw value found in the environment.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Reads and parses an optional environment variable.
///
/// Returns `Ok(None)` when the variable is unset or blank, and an
/// [`ConfigError::InvalidEnvVar`] when it is present but does not parse.
pub fn parse_env_opt<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_opt(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value: raw,
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_is_none() {
        let got: Option<u64> = parse_env_opt("SHARED_UTILS_TEST_UNSET_VARIABLE").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn unparsable_value_is_reported_by_name() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("SHARED_UTILS_TEST_BAD_NUMBER", "twelve") };
        let err = parse_env_opt::<u64>("SHARED_UTILS_TEST_BAD_NUMBER").unwrap_err();
        assert!(err.to_string().contains("SHARED_UTILS_TEST_BAD_NUMBER"));
    }
}
