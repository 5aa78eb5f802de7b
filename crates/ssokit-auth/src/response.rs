//! Signed replies to API calls.
//!
//! Responses have no URI component, so the signature covers the raw body
//! alone and travels out of band in the [`SIGNATURE_HEADER`] header.
//!
//! Verification order: signature header present, signature valid, body
//! decodes, `api_key` present and equal to the verifier's key, `timestamp`
//! within [`ReplayWindow::API_CALL`], then `response_id`, `request_id`,
//! `result`, `duplicate`, `message` and `payload`, each required. The first
//! gap is reported; nothing is accumulated.

use std::fmt;
use std::str::FromStr;

use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::clock::{Clock, ReplayWindow};
use crate::credentials::{ApiSecret, Credentials};
use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::{Payload, decode_object, id_field, int_field, payload_field, require};
use crate::signature::{sign, verify};

/// Header carrying the response signature. Lookups are case-insensitive.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Outcome of an API call as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    /// The call succeeded.
    #[default]
    Success,
    /// The call was rejected as unauthentic or not permitted.
    Invalid,
    /// The call lacked required data.
    Incomplete,
    /// The call failed for any other reason.
    Error,
}

impl ResultCode {
    /// The wire string for this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Invalid => "INVALID",
            Self::Incomplete => "INCOMPLETE",
            Self::Error => "ERROR",
        }
    }

    /// Whether this is [`ResultCode::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "INVALID" => Ok(Self::Invalid),
            "INCOMPLETE" => Ok(Self::Incomplete),
            "ERROR" => Ok(Self::Error),
            other => Err(ProtocolError::DataCorrupt(format!(
                "unknown result code {other:?}"
            ))),
        }
    }
}

/// A reply to an API call.
///
/// # Examples
///
/// ```
/// use ssokit_auth::{ResultCode, SignedResponse};
///
/// let response = SignedResponse::builder()
///     .api_key("k1")
///     .timestamp(1_700_000_000)
///     .response_id(7)
///     .result(ResultCode::Incomplete)
///     .message("token missing")
///     .build();
/// assert!(!response.duplicate);
/// assert!(response.payload.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct SignedResponse {
    /// Api key of the client the response is addressed to.
    #[builder(setter(into))]
    pub api_key: String,
    /// Unix timestamp (seconds) at signing time.
    pub timestamp: i64,
    /// Server-assigned response number.
    #[builder(default)]
    pub response_id: i64,
    /// Echo of the request's ID.
    #[builder(default)]
    pub request_id: Option<String>,
    /// Outcome of the call.
    #[builder(default)]
    pub result: ResultCode,
    /// Set when a request with the same ID was already processed.
    #[builder(default)]
    pub duplicate: bool,
    /// Free-text diagnostic. Never machine-parsed.
    #[builder(default, setter(into))]
    pub message: String,
    /// Call-specific result data.
    #[builder(default)]
    pub payload: Payload,
    /// The signature the response arrived with, set by [`SignedResponse::parse_response`].
    #[builder(default)]
    pub signature: Option<String>,
}

/// Wire form of a response: the signature header value and the JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResponse {
    /// Hex signature over `body`.
    pub signature: String,
    /// JSON response body.
    pub body: String,
}

impl EncodedResponse {
    /// Headers to send with the body: the signature and the content type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DataCorrupt`] if the signature is not a valid
    /// header value.
    pub fn headers(&self) -> ProtocolResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let signature = HeaderValue::from_str(&self.signature)
            .map_err(|e| ProtocolError::DataCorrupt(format!("invalid signature header: {e}")))?;
        headers.insert(SIGNATURE_HEADER, signature);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Serialize)]
struct ResponseBody<'a> {
    timestamp: i64,
    api_key: &'a str,
    response_id: i64,
    request_id: Option<&'a str>,
    result: ResultCode,
    duplicate: bool,
    message: &'a str,
    payload: &'a Payload,
}

impl SignedResponse {
    /// Serialize and sign the response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DataCorrupt`] if the body cannot be encoded.
    pub fn create_response(&self, secret: &ApiSecret) -> ProtocolResult<EncodedResponse> {
        let body = serde_json::to_string(&ResponseBody {
            timestamp: self.timestamp,
            api_key: &self.api_key,
            response_id: self.response_id,
            request_id: self.request_id.as_deref(),
            result: self.result,
            duplicate: self.duplicate,
            message: &self.message,
            payload: &self.payload,
        })
        .map_err(|e| ProtocolError::DataCorrupt(format!("JSON encoding error: {e}")))?;

        let signature = sign(body.as_bytes(), secret.expose());
        debug!(
            response_id = self.response_id,
            result = %self.result,
            duplicate = self.duplicate,
            "signed response"
        );
        Ok(EncodedResponse { signature, body })
    }

    /// Parse and verify a received response.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingSignature`] if the signature header is absent
    /// - [`ProtocolError::SignatureMismatch`] if the signature is wrong or the
    ///   timestamp is outside the window
    /// - [`ProtocolError::DataCorrupt`] if the body or a field cannot be decoded
    /// - [`ProtocolError::DataIncomplete`] on the first missing field
    /// - [`ProtocolError::ApiKeyMismatch`] if the response is addressed to
    ///   another api key
    pub fn parse_response(
        credentials: &Credentials,
        clock: &dyn Clock,
        headers: &HeaderMap,
        body: &[u8],
    ) -> ProtocolResult<Self> {
        let result = verify_response(credentials, clock, headers, body);
        match &result {
            Err(err @ ProtocolError::ApiKeyMismatch(_)) => {
                info!(api_key = %credentials.api_key(), error = %err, "response addressed elsewhere");
            }
            Err(err) => {
                warn!(api_key = %credentials.api_key(), kind = err.kind(), error = %err, "rejected signed response");
            }
            Ok(response) => {
                debug!(response_id = response.response_id, result = %response.result, "verified signed response");
            }
        }
        result
    }
}

fn verify_response(
    credentials: &Credentials,
    clock: &dyn Clock,
    headers: &HeaderMap,
    body: &[u8],
) -> ProtocolResult<SignedResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or_else(|| ProtocolError::MissingSignature(format!("no {SIGNATURE_HEADER} header")))?
        .to_str()
        .map_err(|_| ProtocolError::SignatureMismatch("unreadable signature header".to_owned()))?
        .trim()
        .to_owned();

    if !verify(body, credentials.api_secret().expose(), &signature) {
        return Err(ProtocolError::SignatureMismatch("invalid signature".to_owned()));
    }

    let data = decode_object(body)?;

    match require(&data, "api_key")? {
        Value::String(key) if key == credentials.api_key() => {}
        other => {
            return Err(ProtocolError::ApiKeyMismatch(format!(
                "response carries api_key {other}"
            )));
        }
    }

    let timestamp = int_field("timestamp", require(&data, "timestamp")?)?;
    ReplayWindow::API_CALL.check(timestamp, clock.now())?;

    let response_id = int_field("response_id", require(&data, "response_id")?)?;
    let request_id = id_field("request_id", require(&data, "request_id")?)?;
    let result = match require(&data, "result")? {
        Value::String(code) => code.parse()?,
        other => {
            return Err(ProtocolError::DataCorrupt(format!(
                "result must be a string, found {other}"
            )));
        }
    };
    let duplicate = match require(&data, "duplicate")? {
        Value::Bool(flag) => *flag,
        other => {
            return Err(ProtocolError::DataCorrupt(format!(
                "duplicate must be a boolean, found {other}"
            )));
        }
    };
    let message = match require(&data, "message")? {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    let payload = payload_field(require(&data, "payload")?)?;

    Ok(SignedResponse {
        api_key: credentials.api_key().to_owned(),
        timestamp,
        response_id,
        request_id,
        result,
        duplicate,
        message,
        payload,
        signature: Some(signature),
    })
}
