//! The boundary between the HTTP layer and identity logic.
//!
//! [`SsoHttpService`](crate::service::SsoHttpService) verifies every message
//! before it reaches an [`SsoHandler`], so implementations only ever see
//! authentic, in-window calls and redirects.

use std::future::Future;
use std::pin::Pin;

use ssokit_auth::{Payload, ResultCode, SignedRedirect, SignedRequest};

/// Business outcome of a verified API call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// Result code to report.
    pub result: ResultCode,
    /// Diagnostic message for the caller's logs.
    pub message: String,
    /// Result data.
    pub payload: Payload,
}

impl CallOutcome {
    /// A successful outcome carrying `payload`.
    #[must_use]
    pub fn success(payload: Payload) -> Self {
        Self {
            result: ResultCode::Success,
            message: String::new(),
            payload,
        }
    }

    /// A failed outcome with an empty payload.
    pub fn failure(result: ResultCode, message: impl Into<String>) -> Self {
        Self {
            result,
            message: message.into(),
            payload: Payload::new(),
        }
    }
}

/// Boxed future returned by [`SsoHandler`] methods.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Identity logic behind the endpoint.
///
/// Methods return boxed futures so the service can hold handlers generically
/// without `async fn` in traits.
pub trait SsoHandler: Send + Sync + 'static {
    /// Answer a verified API call.
    fn handle_call(&self, request: SignedRequest) -> HandlerFuture<CallOutcome>;

    /// Start a login for a verified redirect and return the one-time token to
    /// hand back on the return URL, or `None` to refuse.
    fn begin_login(&self, redirect: SignedRedirect) -> HandlerFuture<Option<String>>;
}
