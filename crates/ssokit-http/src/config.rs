//! Reference endpoint configuration.
//!
//! Provides [`ServerConfig`], loaded from environment variables in the same
//! way as the client's configuration.

use serde_json::Value;
use ssokit_auth::{ApiSecret, ConfigError, Credentials, Payload, parse_setting};
use typed_builder::TypedBuilder;

use crate::dedup::DEFAULT_WINDOW_SECS;
use crate::directory::DirectoryUser;

/// Reference endpoint configuration.
///
/// # Examples
///
/// ```
/// use ssokit_http::config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.listen, "127.0.0.1:4580");
/// assert_eq!(config.public_endpoint(), "http://127.0.0.1:4580");
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct ServerConfig {
    /// Bind address (e.g. `"127.0.0.1:4580"`).
    #[builder(default = String::from("127.0.0.1:4580"), setter(into))]
    pub listen: String,

    /// Externally visible base URL. Derived from `listen` when empty.
    #[builder(default, setter(into))]
    pub public_endpoint: String,

    /// Api key of the single registered client.
    #[builder(default, setter(into))]
    pub api_key: String,

    /// Api secret of the single registered client.
    #[builder(default)]
    pub api_secret: ApiSecret,

    /// User ID every login resolves to.
    #[builder(default = 1)]
    pub demo_user_id: i64,

    /// E-mail address reported in the demo user's metadata.
    #[builder(default = String::from("demo@example.com"), setter(into))]
    pub demo_user_email: String,

    /// How long request IDs are remembered, in seconds.
    #[builder(default = DEFAULT_WINDOW_SECS)]
    pub dedup_window_secs: i64,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"), setter(into))]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    #[builder(default)]
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: String::from("127.0.0.1:4580"),
            public_endpoint: String::new(),
            api_key: String::new(),
            api_secret: ApiSecret::default(),
            demo_user_id: 1,
            demo_user_email: String::from("demo@example.com"),
            dedup_window_secs: DEFAULT_WINDOW_SECS,
            log_level: String::from("info"),
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SSO_LISTEN` | `127.0.0.1:4580` |
    /// | `SSO_PUBLIC_ENDPOINT` | `http://<SSO_LISTEN>` |
    /// | `SSO_API_KEY` | *(required)* |
    /// | `SSO_API_SECRET` | *(required)* |
    /// | `SSO_DEMO_USER_ID` | `1` |
    /// | `SSO_DEMO_USER_EMAIL` | `demo@example.com` |
    /// | `SSO_DEDUP_WINDOW_SECS` | `86400` |
    /// | `LOG_LEVEL` | `info` |
    /// | `SSO_LOG_JSON` | `false` |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a numeric variable is set but
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SSO_LISTEN") {
            config.listen = v;
        }
        if let Ok(v) = std::env::var("SSO_PUBLIC_ENDPOINT") {
            config.public_endpoint = v;
        }
        if let Ok(v) = std::env::var("SSO_API_KEY") {
            config.api_key = v;
        }
        if let Ok(v) = std::env::var("SSO_API_SECRET") {
            config.api_secret = ApiSecret::from(v);
        }
        if let Ok(v) = std::env::var("SSO_DEMO_USER_ID") {
            config.demo_user_id = parse_setting("SSO_DEMO_USER_ID", &v)?;
        }
        if let Ok(v) = std::env::var("SSO_DEMO_USER_EMAIL") {
            config.demo_user_email = v;
        }
        if let Ok(v) = std::env::var("SSO_DEDUP_WINDOW_SECS") {
            config.dedup_window_secs = parse_setting("SSO_DEDUP_WINDOW_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("SSO_LOG_JSON") {
            config.log_json = parse_setting("SSO_LOG_JSON", &v)?;
        }

        Ok(config)
    }

    /// The externally visible base URL.
    #[must_use]
    pub fn public_endpoint(&self) -> String {
        if self.public_endpoint.is_empty() {
            format!("http://{}", self.listen)
        } else {
            self.public_endpoint.clone()
        }
    }

    /// Credentials of the registered client, bound to the public endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVariable`] if the api key or secret is empty.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingVariable("SSO_API_KEY"));
        }
        if self.api_secret.is_empty() {
            return Err(ConfigError::MissingVariable("SSO_API_SECRET"));
        }
        Ok(Credentials::new(
            self.public_endpoint(),
            self.api_key.clone(),
            self.api_secret.clone(),
        ))
    }

    /// The user every login resolves to.
    #[must_use]
    pub fn demo_user(&self) -> DirectoryUser {
        let mut metadata = Payload::new();
        metadata.insert("email".to_owned(), Value::String(self.demo_user_email.clone()));
        DirectoryUser {
            user_id: self.demo_user_id,
            metadata,
        }
    }
}
