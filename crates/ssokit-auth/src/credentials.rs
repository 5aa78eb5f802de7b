//! Shared-secret credentials and credential lookup.
//!
//! [`Credentials`] bind an endpoint, an api key and an [`ApiSecret`]. The
//! secret never appears in `Debug` output and cannot be serialized.
//!
//! Endpoints serving many clients resolve credentials by api key through the
//! [`CredentialProvider`] trait; [`StaticCredentialProvider`] is an in-memory
//! implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProtocolError;

/// The shared api secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiSecret(Vec<u8>);

impl ApiSecret {
    /// Wrap raw secret bytes.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    /// Whether the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expose the raw secret for signing.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiSecret(***)")
    }
}

impl From<&str> for ApiSecret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for ApiSecret {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

/// Endpoint, api key and secret used for one side of the exchange.
///
/// # Examples
///
/// ```
/// use ssokit_auth::Credentials;
///
/// let creds = Credentials::new("https://sso.example.com/", "k1", "s1");
/// assert_eq!(creds.endpoint(), "https://sso.example.com");
/// assert!(!format!("{creds:?}").contains("s1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    endpoint: String,
    api_key: String,
    api_secret: ApiSecret,
}

impl Credentials {
    /// Create credentials. Trailing slashes on the endpoint are dropped.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<ApiSecret>,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// The endpoint base URL without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The api key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// The api secret.
    #[must_use]
    pub fn api_secret(&self) -> &ApiSecret {
        &self.api_secret
    }
}

/// Trait for looking up credentials by api key.
pub trait CredentialProvider: Send + Sync {
    /// Retrieve the credentials registered for `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ApiKeyMismatch`] if the api key is unknown.
    fn get_credentials(&self, api_key: &str) -> Result<Arc<Credentials>, ProtocolError>;
}

/// An in-memory credential provider keyed by api key.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    credentials: HashMap<String, Arc<Credentials>>,
}

impl StaticCredentialProvider {
    /// Create a provider from an iterable of credentials.
    pub fn new(credentials: impl IntoIterator<Item = Credentials>) -> Self {
        Self {
            credentials: credentials
                .into_iter()
                .map(|c| (c.api_key().to_owned(), Arc::new(c)))
                .collect(),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn get_credentials(&self, api_key: &str) -> Result<Arc<Credentials>, ProtocolError> {
        self.credentials
            .get(api_key)
            .cloned()
            .ok_or_else(|| ProtocolError::ApiKeyMismatch(format!("unknown api_key {api_key}")))
    }
}
