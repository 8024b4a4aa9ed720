//! Startup configuration, read once from the environment.

use std::{fmt, path::PathBuf};

use tokio::time::Duration;

use crate::viya::auth::token_manager::{RefreshFailurePolicy, DEFAULT_SAFETY_MARGIN};

pub const CLIENT_ID: &str = "VIYA_CLIENT_ID";
pub const CLIENT_SECRET: &str = "VIYA_CLIENT_SECRET";
pub const BASE_URL: &str = "VIYA_BASE_URL";
pub const CA_BUNDLE: &str = "VIYA_CA_BUNDLE";
pub const REQUEST_TIMEOUT_SECS: &str = "VIYA_REQUEST_TIMEOUT_SECS";
pub const TOKEN_MARGIN_SECS: &str = "VIYA_TOKEN_MARGIN_SECS";
pub const TOKEN_FALLBACK: &str = "VIYA_TOKEN_FALLBACK";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for the timeout and margin settings.
pub const MAX_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env var {0} is not set")]
    Missing(&'static str),
    #[error("env var {0} is empty")]
    Empty(&'static str),
    #[error("env var {var} is not a valid number of seconds: {value:?}")]
    NotSeconds { var: &'static str, value: String },
    #[error("env var {var} must be at most {max} seconds, got {value}")]
    TooManySeconds {
        var: &'static str,
        value: u64,
        max: u64,
    },
    #[error("env var {var} must be an http(s) URL, got {value:?}")]
    NotUrl { var: &'static str, value: String },
    #[error("env var {var}: {source}")]
    Policy {
        var: &'static str,
        source: crate::viya::auth::token_manager::UnknownPolicy,
    },
}

/// Credentials and connection settings for the platform.
#[derive(Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    /// Without a trailing slash.
    pub base_url: String,
    pub ca_bundle: Option<PathBuf>,
    pub request_timeout: Duration,
    pub safety_margin: Duration,
    pub failure_policy: RefreshFailurePolicy,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("ca_bundle", &self.ca_bundle)
            .field("request_timeout", &self.request_timeout)
            .field("safety_margin", &self.safety_margin)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            let value = lookup(key).ok_or(ConfigError::Missing(key))?;
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(key));
            }
            Ok(value)
        };
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let seconds = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            let Some(value) = optional(key) else {
                return Ok(default);
            };
            let secs: u64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::NotSeconds { var: key, value })?;
            if secs > MAX_SECONDS {
                return Err(ConfigError::TooManySeconds {
                    var: key,
                    value: secs,
                    max: MAX_SECONDS,
                });
            }
            Ok(Duration::from_secs(secs))
        };

        let base_url = required(BASE_URL)?.trim().trim_end_matches('/').to_owned();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ConfigError::NotUrl {
                var: BASE_URL,
                value: base_url,
            });
        }

        let failure_policy = match optional(TOKEN_FALLBACK) {
            None => RefreshFailurePolicy::default(),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|source| ConfigError::Policy {
                    var: TOKEN_FALLBACK,
                    source,
                })?,
        };

        Ok(Self {
            client_id: required(CLIENT_ID)?,
            client_secret: required(CLIENT_SECRET)?,
            base_url,
            ca_bundle: optional(CA_BUNDLE).map(PathBuf::from),
            request_timeout: seconds(REQUEST_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT)?,
            safety_margin: seconds(TOKEN_MARGIN_SECS, DEFAULT_SAFETY_MARGIN)?,
            failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        (CLIENT_ID, "abc"),
        (CLIENT_SECRET, "xyz"),
        (BASE_URL, "https://example.test/"),
    ];

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.base_url, "https://example.test");
        assert_eq!(config.ca_bundle, None);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.safety_margin, DEFAULT_SAFETY_MARGIN);
        assert_eq!(config.failure_policy, RefreshFailurePolicy::FailFast);
    }

    #[test]
    fn optional_settings() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            (CA_BUNDLE, "/etc/viya/ca.pem"),
            (REQUEST_TIMEOUT_SECS, "10"),
            (TOKEN_MARGIN_SECS, " 5 "),
            (TOKEN_FALLBACK, "serve-unexpired"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.ca_bundle, Some(PathBuf::from("/etc/viya/ca.pem")));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.safety_margin, Duration::from_secs(5));
        assert_eq!(config.failure_policy, RefreshFailurePolicy::ServeUnexpired);
    }

    #[test]
    fn missing_and_empty_required_values() {
        let err = Config::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(CLIENT_ID)));

        let mut vars = REQUIRED.to_vec();
        vars[1] = (CLIENT_SECRET, "  ");
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Empty(CLIENT_SECRET)));
    }

    #[test]
    fn rejects_bad_values() {
        let mut vars = REQUIRED.to_vec();
        vars.push((TOKEN_MARGIN_SECS, "half a minute"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::NotSeconds { var: TOKEN_MARGIN_SECS, .. }));

        let mut vars = REQUIRED.to_vec();
        vars[2] = (BASE_URL, "example.test");
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::NotUrl { .. }));

        let mut vars = REQUIRED.to_vec();
        vars.push((TOKEN_FALLBACK, "always"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::Policy { .. }));
    }

    #[test]
    fn rejects_durations_past_the_limit() {
        let mut vars = REQUIRED.to_vec();
        vars.push((TOKEN_MARGIN_SECS, "18446744073709551615"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooManySeconds { var: TOKEN_MARGIN_SECS, value: u64::MAX, .. }
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push((REQUEST_TIMEOUT_SECS, "86401"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::TooManySeconds { var: REQUEST_TIMEOUT_SECS, .. }));

        let mut vars = REQUIRED.to_vec();
        vars.push((TOKEN_MARGIN_SECS, "86400"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.safety_margin, Duration::from_secs(MAX_SECONDS));
    }

    #[test]
    fn debug_hides_secret() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        assert!(!format!("{:?}", config).contains("xyz"));
    }
}
