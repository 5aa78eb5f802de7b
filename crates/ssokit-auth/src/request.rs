//! Signed API requests.
//!
//! A request is an HTTP POST whose JSON body carries the api key, a timestamp,
//! an optional request ID and the call payload. The signature covers the
//! relative request URI followed by the raw body and travels as the final
//! `signature` query parameter:
//!
//! ```text
//! POST /user/fetch?signature=<hex>
//! {"request_id":"r-1","api_key":"k1","timestamp":1700000000,"payload":{"token":"abc"}}
//! ```
//!
//! Verification order: signature present, signature valid, body decodes,
//! `api_key` matches, `timestamp` present and inside
//! [`ReplayWindow::API_CALL`], `payload` present.
//!
//! Query parameters other than `signature` are merged into the decoded body
//! only for keys the body does not carry; body fields are authoritative.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::canonical::{
    SIGNATURE_PARAM, encode_signature, normalize_request_uri, push_query_separator, relative_uri,
    split_signed_uri,
};
use crate::clock::{Clock, ReplayWindow};
use crate::credentials::Credentials;
use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::{Payload, decode_object, id_field, int_field, payload_field, require};
use crate::signature::{sign, verify};

/// An authenticated API call.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    /// Request URI relative to the endpoint, starting with `/`.
    pub request_uri: String,
    /// The caller's api key.
    pub api_key: String,
    /// Unix timestamp (seconds) at signing time.
    pub timestamp: i64,
    /// Caller-supplied idempotency key, unique within 24 hours.
    pub request_id: Option<String>,
    /// Call-specific payload.
    pub payload: Payload,
    /// The signature the request arrived with, set by [`SignedRequest::parse_request`].
    pub signature: Option<String>,
}

/// Wire form of a request: the full URL to POST to and the JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRequest {
    /// Endpoint URL including the `signature` query parameter.
    pub url: String,
    /// JSON request body.
    pub body: String,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    api_key: &'a str,
    timestamp: i64,
    payload: &'a Payload,
}

impl SignedRequest {
    /// Create an unsigned request. The URI is normalized to begin with `/`.
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
            request_id: None,
            payload,
            signature: None,
        }
    }

    /// Attach a request ID. An empty ID is treated as none.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        self.request_id = (!request_id.is_empty()).then_some(request_id);
        self
    }

    /// Serialize and sign the request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DataCorrupt`] if the body cannot be encoded.
    pub fn create_request(&self, credentials: &Credentials) -> ProtocolResult<EncodedRequest> {
        let body = serde_json::to_string(&RequestBody {
            request_id: self.request_id.as_deref(),
            api_key: &self.api_key,
            timestamp: self.timestamp,
            payload: &self.payload,
        })
        .map_err(|e| ProtocolError::DataCorrupt(format!("JSON encoding error: {e}")))?;

        let mut canonical = Vec::with_capacity(self.request_uri.len() + body.len());
        canonical.extend_from_slice(self.request_uri.as_bytes());
        canonical.extend_from_slice(body.as_bytes());
        let signature = sign(&canonical, credentials.api_secret().expose());

        let mut url = format!("{}{}", credentials.endpoint(), self.request_uri);
        push_query_separator(&mut url);
        url.push_str(SIGNATURE_PARAM);
        url.push('=');
        url.push_str(&encode_signature(&signature));

        debug!(request_uri = %self.request_uri, api_key = %self.api_key, "signed request");

        Ok(EncodedRequest { url, body })
    }

    /// Parse and verify a received request.
    ///
    /// `raw_uri` is the request target as received (absolute URL or
    /// origin-form path with query); `body` is the raw request body.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingSignature`] if there is no `signature` parameter
    /// - [`ProtocolError::SignatureMismatch`] if the signature is wrong or the
    ///   timestamp is outside the window
    /// - [`ProtocolError::DataCorrupt`] if the body is not a JSON object
    /// - [`ProtocolError::DataIncomplete`] if `api_key`, `timestamp` or
    ///   `payload` is missing
    /// - [`ProtocolError::ApiKeyMismatch`] if `api_key` belongs to someone else
    pub fn parse_request(
        credentials: &Credentials,
        clock: &dyn Clock,
        raw_uri: &str,
        body: &[u8],
    ) -> ProtocolResult<Self> {
        let relative = relative_uri(credentials.endpoint(), raw_uri);
        let result = verify_request(credentials, clock, &relative, body);
        if let Err(err) = &result {
            // Never log the body: the failure may be a forgery attempt.
            warn!(
                request_uri = %relative.split('?').next().unwrap_or_default(),
                api_key = %credentials.api_key(),
                kind = err.kind(),
                error = %err,
                "rejected signed request"
            );
        }
        result
    }

    /// The api key a request claims to come from, without verifying anything.
    ///
    /// Endpoints use this only to look up the credentials for
    /// [`SignedRequest::parse_request`], which re-checks the key.
    #[must_use]
    pub fn claimed_api_key(raw_uri: &str, body: &[u8]) -> Option<String> {
        if let Ok(data) = decode_object(body) {
            if let Some(Value::String(key)) = data.get("api_key") {
                return Some(key.clone());
            }
        }
        let (_, query) = raw_uri.split_once('?')?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "api_key")
            .map(|(_, v)| v.into_owned())
    }
}

fn verify_request(
    credentials: &Credentials,
    clock: &dyn Clock,
    relative: &str,
    body: &[u8],
) -> ProtocolResult<SignedRequest> {
    let signed = split_signed_uri(relative)?;

    let mut canonical = Vec::with_capacity(signed.canonical.len() + body.len());
    canonical.extend_from_slice(signed.canonical.as_bytes());
    canonical.extend_from_slice(body);
    if !verify(&canonical, credentials.api_secret().expose(), &signed.signature) {
        return Err(ProtocolError::SignatureMismatch("invalid signature".to_owned()));
    }

    let mut data = decode_object(body)?;
    for (key, value) in &signed.params {
        if key != SIGNATURE_PARAM && !data.contains_key(key) {
            data.insert(key.clone(), Value::String(value.clone()));
        }
    }

    match data.get("api_key") {
        None | Some(Value::Null) => {
            return Err(ProtocolError::DataIncomplete("missing api_key".to_owned()));
        }
        Some(Value::String(key)) if key == credentials.api_key() => {}
        Some(other) => {
            return Err(ProtocolError::ApiKeyMismatch(format!(
                "request carries api_key {other}"
            )));
        }
    }

    let timestamp = int_field("timestamp", require(&data, "timestamp")?)?;
    ReplayWindow::API_CALL.check(timestamp, clock.now())?;

    let request_id = match data.get("request_id") {
        Some(value) => id_field("request_id", value)?,
        None => None,
    };

    let payload = match data.get("payload") {
        None | Some(Value::Null) => {
            return Err(ProtocolError::DataIncomplete("missing payload".to_owned()));
        }
        Some(value) => payload_field(value)?,
    };

    debug!(request_uri = %signed.path, api_key = %credentials.api_key(), "verified signed request");

    Ok(SignedRequest {
        request_uri: signed.path.to_owned(),
        api_key: credentials.api_key().to_owned(),
        timestamp,
        request_id,
        payload,
        signature: Some(signed.signature),
    })
}
