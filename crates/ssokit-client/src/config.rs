//! Client configuration.
//!
//! Provides [`SsoConfig`] for pointing a client application at an identity
//! endpoint. Values are loaded from environment variables.

use std::time::Duration;

use ssokit_auth::{ApiSecret, ConfigError, Credentials, parse_setting};
use typed_builder::TypedBuilder;

/// Client configuration.
///
/// The secret is held as an [`ApiSecret`] and is redacted from `Debug` output.
///
/// # Examples
///
/// ```
/// use ssokit_client::config::SsoConfig;
///
/// let config = SsoConfig::builder()
///     .endpoint("https://sso.example.com")
///     .api_key("k1")
///     .api_secret("s1".into())
///     .build();
/// assert_eq!(config.request_timeout_secs, 30);
/// assert_eq!(config.credentials().unwrap().api_key(), "k1");
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct SsoConfig {
    /// Base URL of the identity endpoint (e.g. `"https://sso.example.com"`).
    #[builder(default, setter(into))]
    pub endpoint: String,

    /// Api key issued to this client.
    #[builder(default, setter(into))]
    pub api_key: String,

    /// Api secret shared with the endpoint.
    #[builder(default)]
    pub api_secret: ApiSecret,

    /// Timeout for a single API call, in seconds.
    #[builder(default = 30)]
    pub request_timeout_secs: u64,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            api_secret: ApiSecret::default(),
            request_timeout_secs: 30,
            log_level: String::from("info"),
        }
    }
}

impl SsoConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SSO_ENDPOINT` | *(required)* |
    /// | `SSO_API_KEY` | *(required)* |
    /// | `SSO_API_SECRET` | *(required)* |
    /// | `SSO_REQUEST_TIMEOUT_SECS` | `30` |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// Required values are only checked by [`SsoConfig::credentials`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a numeric variable is set but
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SSO_ENDPOINT") {
            config.endpoint = v;
        }
        if let Ok(v) = std::env::var("SSO_API_KEY") {
            config.api_key = v;
        }
        if let Ok(v) = std::env::var("SSO_API_SECRET") {
            config.api_secret = ApiSecret::from(v);
        }
        if let Ok(v) = std::env::var("SSO_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = parse_setting("SSO_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        Ok(config)
    }

    /// Assemble the client's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVariable`] if the endpoint, api key or
    /// secret is empty.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingVariable("SSO_ENDPOINT"));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingVariable("SSO_API_KEY"));
        }
        if self.api_secret.is_empty() {
            return Err(ConfigError::MissingVariable("SSO_API_SECRET"));
        }
        Ok(Credentials::new(
            self.endpoint.clone(),
            self.api_key.clone(),
            self.api_secret.clone(),
        ))
    }

    /// The per-call timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_create_default_config() {
        let config = SsoConfig::default();
        assert!(config.endpoint.is_empty());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_should_load_from_env() {
        let config = SsoConfig::from_env().unwrap();
        assert!(!config.log_level.is_empty());
    }

    #[test]
    fn test_should_report_first_missing_variable() {
        let config = SsoConfig::builder().endpoint("https://sso.example.com").build();
        assert_eq!(
            config.credentials(),
            Err(ConfigError::MissingVariable("SSO_API_KEY"))
        );

        let config = SsoConfig::builder()
            .endpoint("https://sso.example.com")
            .api_key("k1")
            .build();
        assert_eq!(
            config.credentials(),
            Err(ConfigError::MissingVariable("SSO_API_SECRET"))
        );
    }

    #[test]
    fn test_should_redact_secret_in_debug_output() {
        let config = SsoConfig::builder()
            .endpoint("https://sso.example.com")
            .api_key("k1")
            .api_secret("hunter2".into())
            .build();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
