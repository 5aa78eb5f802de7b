//! Signed browser redirects.
//!
//! A redirect is a GET URL that carries its whole payload in the query string,
//! followed by `api_key`, `timestamp` and finally `signature`:
//!
//! ```text
//! https://sso.example.com/user/login?returnUrl=...&iframe=0&api_key=k1&timestamp=1700000000&signature=<hex>
//! ```
//!
//! The signature covers the relative URI up to, but excluding, the
//! `&signature=` parameter. A human may sit on a login page for a while, so
//! redirects are accepted inside the wider [`ReplayWindow::REDIRECT`].

use serde_json::Value;
use tracing::{debug, warn};

use crate::canonical::{
    SIGNATURE_PARAM, encode_query, encode_signature, normalize_request_uri, push_query_separator,
    relative_uri, split_signed_uri,
};
use crate::clock::{Clock, ReplayWindow};
use crate::credentials::Credentials;
use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::{Payload, int_field};
use crate::signature::{sign, verify};

/// A redirect URL signed for a browser round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRedirect {
    /// Request URI relative to the endpoint, starting with `/`, without query.
    pub request_uri: String,
    /// The caller's api key.
    pub api_key: String,
    /// Unix timestamp (seconds) at signing time.
    pub timestamp: i64,
    /// Query parameters other than `api_key`, `timestamp` and `signature`.
    ///
    /// Values come back from [`SignedRedirect::parse_url`] as strings.
    pub payload: Payload,
    /// The signature the URL arrived with, set by [`SignedRedirect::parse_url`].
    pub signature: Option<String>,
}

impl SignedRedirect {
    /// Create an unsigned redirect. The URI is normalized to begin with `/`.
    pub fn new(
        api_key: impl Into<String>,
        request_uri: &str,
        payload: Payload,
        timestamp: i64,
    ) -> Self {
        Self {
            request_uri: normalize_request_uri(request_uri),
            api_key: api_key.into(),
            timestamp,
            payload,
            signature: None,
        }
    }

    /// Build the absolute, signed URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use ssokit_auth::{Credentials, SignedRedirect};
    ///
    /// let creds = Credentials::new("https://sso.example.com", "k1", "s1");
    /// let payload = json!({"iframe": 0}).as_object().unwrap().clone();
    /// let url = SignedRedirect::new("k1", "/user/login", payload, 1_700_000_000).create_url(&creds);
    /// assert!(url.starts_with(
    ///     "https://sso.example.com/user/login?iframe=0&api_key=k1&timestamp=1700000000&signature="
    /// ));
    /// ```
    #[must_use]
    pub fn create_url(&self, credentials: &Credentials) -> String {
        let mut fields = self.payload.clone();
        fields.insert("api_key".to_owned(), Value::String(self.api_key.clone()));
        fields.insert("timestamp".to_owned(), Value::from(self.timestamp));

        let mut relative = self.request_uri.clone();
        push_query_separator(&mut relative);
        relative.push_str(&encode_query(&fields));

        let signature = sign(relative.as_bytes(), credentials.api_secret().expose());
        debug!(request_uri = %self.request_uri, api_key = %self.api_key, "signed redirect");

        format!(
            "{}{relative}&{SIGNATURE_PARAM}={}",
            credentials.endpoint(),
            encode_signature(&signature)
        )
    }

    /// Parse and verify a redirect URL.
    ///
    /// `url` may be absolute or an origin-form request target.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingSignature`] if there is no `signature` parameter
    /// - [`ProtocolError::SignatureMismatch`] if the signature is wrong or the
    ///   timestamp is outside the window
    /// - [`ProtocolError::DataIncomplete`] if `api_key` is absent or not ours,
    ///   or `timestamp` is absent
    /// - [`ProtocolError::DataCorrupt`] if `timestamp` is not an integer
    pub fn parse_url(credentials: &Credentials, clock: &dyn Clock, url: &str) -> ProtocolResult<Self> {
        let relative = relative_uri(credentials.endpoint(), url);
        let result = verify_redirect(credentials, clock, &relative);
        if let Err(err) = &result {
            warn!(
                request_uri = %relative.split('?').next().unwrap_or_default(),
                api_key = %credentials.api_key(),
                kind = err.kind(),
                error = %err,
                "rejected signed redirect"
            );
        }
        result
    }

    /// The api key a redirect URL claims to come from, without verifying anything.
    #[must_use]
    pub fn claimed_api_key(url: &str) -> Option<String> {
        let (_, query) = url.split_once('?')?;
        form_urlencoded::parse(query.as_bytes())
            .filter(|(k, _)| k == "api_key")
            .last()
            .map(|(_, v)| v.into_owned())
    }
}

fn verify_redirect(
    credentials: &Credentials,
    clock: &dyn Clock,
    relative: &str,
) -> ProtocolResult<SignedRedirect> {
    let signed = split_signed_uri(relative)?;
    if !verify(
        signed.canonical.as_bytes(),
        credentials.api_secret().expose(),
        &signed.signature,
    ) {
        return Err(ProtocolError::SignatureMismatch("invalid signature".to_owned()));
    }

    if signed.param("api_key") != Some(credentials.api_key()) {
        return Err(ProtocolError::DataIncomplete(
            "api_key missing or not addressed to this endpoint".to_owned(),
        ));
    }

    let raw_timestamp = signed
        .param("timestamp")
        .ok_or_else(|| ProtocolError::DataIncomplete("missing timestamp".to_owned()))?;
    let timestamp = int_field("timestamp", &Value::String(raw_timestamp.to_owned()))?;
    ReplayWindow::REDIRECT.check(timestamp, clock.now())?;

    let mut payload = Payload::new();
    for (key, value) in &signed.params {
        if !matches!(key.as_str(), "api_key" | "timestamp" | SIGNATURE_PARAM) {
            payload.insert(key.clone(), Value::String(value.clone()));
        }
    }

    debug!(request_uri = %signed.path, api_key = %credentials.api_key(), "verified signed redirect");

    Ok(SignedRedirect {
        request_uri: signed.path.to_owned(),
        api_key: credentials.api_key().to_owned(),
        timestamp,
        payload,
        signature: Some(signed.signature),
    })
}
