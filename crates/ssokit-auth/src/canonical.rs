//! Canonical string construction shared by all message kinds.
//!
//! Signatures are computed over byte-exact strings, so signer and verifier
//! must agree on every character:
//!
//! ```text
//! request   = RelativeUri + Body
//! response  = Body
//! redirect  = RelativeUri            (query string includes api_key, timestamp)
//! ```
//!
//! `RelativeUri` is the request path relative to the endpoint, starting with
//! `/`, including any query string but without the trailing
//! `signature=<hex>` parameter. Verifiers rebuild it from the raw URI they
//! received rather than re-encoding parsed parameters.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::payload::Payload;

/// Name of the query parameter carrying the signature.
pub const SIGNATURE_PARAM: &str = "signature";

/// Characters left unencoded when placing a signature in a URL.
const QUERY_VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

/// A relative URI split into its signed components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUri<'a> {
    /// The path before the first `?`.
    pub path: &'a str,
    /// The URI with the trailing signature parameter removed.
    pub canonical: &'a str,
    /// All decoded query parameters, in order, including `signature`.
    pub params: Vec<(String, String)>,
    /// The provided signature (last occurrence wins).
    pub signature: String,
}

impl SignedUri<'_> {
    /// The last value of query parameter `name`, if present.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Ensure a request URI begins with `/`.
///
/// # Examples
///
/// ```
/// use ssokit_auth::canonical::normalize_request_uri;
///
/// assert_eq!(normalize_request_uri("user/fetch"), "/user/fetch");
/// assert_eq!(normalize_request_uri("/user/fetch"), "/user/fetch");
/// ```
#[must_use]
pub fn normalize_request_uri(uri: &str) -> String {
    if uri.starts_with('/') {
        uri.to_owned()
    } else {
        format!("/{uri}")
    }
}

/// Append the separator that precedes the next query parameter.
pub fn push_query_separator(uri: &mut String) {
    uri.push(if uri.contains('?') { '&' } else { '?' });
}

/// Reduce a received URI to the path relative to `endpoint`.
///
/// `raw` may be an absolute URL under the endpoint (as produced by redirect
/// builders) or an origin-form request target as seen by an HTTP server, in
/// which case the endpoint's own path prefix is removed. Leading slashes are
/// collapsed to one.
///
/// # Examples
///
/// ```
/// use ssokit_auth::canonical::relative_uri;
///
/// let endpoint = "https://sso.example.com/api";
/// assert_eq!(
///     relative_uri(endpoint, "https://sso.example.com/api/user/login?a=1"),
///     "/user/login?a=1"
/// );
/// assert_eq!(relative_uri(endpoint, "/api/user/fetch?signature=ab"), "/user/fetch?signature=ab");
/// assert_eq!(relative_uri(endpoint, "/user/fetch"), "/user/fetch");
/// ```
#[must_use]
pub fn relative_uri(endpoint: &str, raw: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    let rest = strip_base(raw, endpoint)
        .or_else(|| endpoint_path(endpoint).and_then(|path| strip_base(raw, path)))
        .unwrap_or(raw);
    format!("/{}", rest.trim_start_matches('/'))
}

/// Split a relative URI into path, canonical string, parameters and signature.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingSignature`] if there is no query string or
/// no `signature` parameter.
pub fn split_signed_uri(relative: &str) -> Result<SignedUri<'_>, ProtocolError> {
    let Some((path, query)) = relative.split_once('?') else {
        return Err(ProtocolError::MissingSignature(
            "request URI has no query string".to_owned(),
        ));
    };

    let params: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let signature = params
        .iter()
        .rev()
        .find(|(k, _)| k == SIGNATURE_PARAM)
        .map(|(_, v)| v.clone())
        .ok_or_else(|| {
            ProtocolError::MissingSignature("no signature query parameter".to_owned())
        })?;

    Ok(SignedUri {
        path,
        canonical: strip_trailing_signature(relative),
        params,
        signature,
    })
}

/// Remove a trailing `?signature=<alnum>` or `&signature=<alnum>` parameter.
///
/// A signature that is not the last parameter is left in place, so the
/// canonical string will not match and verification fails closed.
#[must_use]
pub fn strip_trailing_signature(uri: &str) -> &str {
    let Some(idx) = uri.rfind(['&', '?']) else {
        return uri;
    };
    let (head, tail) = uri.split_at(idx);
    match tail[1..].strip_prefix("signature=") {
        Some(sig) if !sig.is_empty() && sig.bytes().all(|b| b.is_ascii_alphanumeric()) => head,
        _ => uri,
    }
}

/// Percent-encode a signature for use as a query value.
#[must_use]
pub fn encode_signature(signature: &str) -> String {
    utf8_percent_encode(signature, QUERY_VALUE_ENCODE_SET).to_string()
}

/// Encode a payload as an `application/x-www-form-urlencoded` query string.
///
/// Scalars are written as text (`true`/`false` become `1`/`0`), `null` values
/// are skipped, and nested arrays and objects use bracket notation
/// (`meta[lang]=en`, `ids[0]=7`).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use ssokit_auth::canonical::encode_query;
///
/// let payload = json!({"returnUrl": "https://app/cb?x=1", "iframe": 0});
/// assert_eq!(
///     encode_query(payload.as_object().unwrap()),
///     "returnUrl=https%3A%2F%2Fapp%2Fcb%3Fx%3D1&iframe=0"
/// );
/// ```
#[must_use]
pub fn encode_query(payload: &Payload) -> String {
    let mut pairs = Vec::with_capacity(payload.len());
    for (key, value) in payload {
        flatten_value(key, value, &mut pairs);
    }
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((prefix.to_owned(), if *b { "1" } else { "0" }.to_owned())),
        Value::Number(n) => out.push((prefix.to_owned(), n.to_string())),
        Value::String(s) => out.push((prefix.to_owned(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(&format!("{prefix}[{i}]"), item, out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                flatten_value(&format!("{prefix}[{k}]"), v, out);
            }
        }
    }
}

/// Strip `base` from the front of `raw` if it ends on a path boundary.
fn strip_base<'a>(raw: &'a str, base: &str) -> Option<&'a str> {
    if base.is_empty() {
        return None;
    }
    let rest = raw.strip_prefix(base)?;
    (rest.is_empty() || rest.starts_with(['/', '?'])).then_some(rest)
}

/// The path component of an absolute endpoint URL, if it has one.
fn endpoint_path(endpoint: &str) -> Option<&str> {
    let (_, after_scheme) = endpoint.split_once("://")?;
    let path = &after_scheme[after_scheme.find('/')?..];
    (path.len() > 1).then_some(path)
}
