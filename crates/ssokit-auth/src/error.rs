//! Error types for the signed-message protocol.
//!
//! Every verification failure is a [`ProtocolError`]. Variants are grouped into
//! an [`ErrorCategory`] so callers can tell a possible attack apart from
//! malformed input or a broken network path. Security failures must not be
//! logged together with payload contents.

/// Broad classification of a [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The message is unsigned, mis-signed, stale or addressed to someone else.
    Security,
    /// The message is authentic but structurally unusable.
    MalformedInput,
    /// The underlying transport failed.
    Infrastructure,
}

/// Errors raised while building or verifying signed messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Underlying I/O failed or the endpoint answered with a non-2xx status.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// No signature is present in the query string or headers.
    #[error("missing signature: {0}")]
    MissingSignature(String),

    /// The signature does not match, or the timestamp is outside the window.
    #[error("signature verification failed: {0}")]
    SignatureMismatch(String),

    /// A required field is absent from an otherwise authentic message.
    #[error("data incomplete: {0}")]
    DataIncomplete(String),

    /// The body could not be decoded as the expected structure.
    #[error("data corrupt: {0}")]
    DataCorrupt(String),

    /// The message is authentic but carries another recipient's api key.
    #[error("api key mismatch: {0}")]
    ApiKeyMismatch(String),
}

impl ProtocolError {
    /// The category this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingSignature(_) | Self::SignatureMismatch(_) | Self::ApiKeyMismatch(_) => {
                ErrorCategory::Security
            }
            Self::DataIncomplete(_) | Self::DataCorrupt(_) => ErrorCategory::MalformedInput,
            Self::TransportFailure(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether this is a security failure (tampering, probing or misrouting).
    #[must_use]
    pub fn is_security(&self) -> bool {
        self.category() == ErrorCategory::Security
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only transport failures are transient; everything else points at a
    /// configuration mismatch or an active attack.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    /// Short, stable name of the error kind, suitable for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransportFailure(_) => "TransportFailure",
            Self::MissingSignature(_) => "MissingSignature",
            Self::SignatureMismatch(_) => "SignatureMismatch",
            Self::DataIncomplete(_) => "DataIncomplete",
            Self::DataCorrupt(_) => "DataCorrupt",
            Self::ApiKeyMismatch(_) => "ApiKeyMismatch",
        }
    }
}

/// Convenience result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while assembling credentials or settings from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is unset or empty.
    #[error("missing required configuration variable {0}")]
    MissingVariable(&'static str),

    /// A setting is present but cannot be used.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Name of the setting.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Parse the raw value of setting `name`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] naming the setting if `raw` does not
/// parse as `T`.
///
/// # Examples
///
/// ```
/// use ssokit_auth::error::{ConfigError, parse_setting};
///
/// assert_eq!(parse_setting::<u64>("SSO_REQUEST_TIMEOUT_SECS", "45"), Ok(45));
/// assert!(matches!(
///     parse_setting::<u64>("SSO_REQUEST_TIMEOUT_SECS", "soon"),
///     Err(ConfigError::InvalidValue { name: "SSO_REQUEST_TIMEOUT_SECS", .. })
/// ));
/// ```
pub fn parse_setting<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        name,
        reason: format!("{raw:?}: {e}"),
    })
}
