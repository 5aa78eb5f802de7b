//! Outbound transport for signed API calls.
//!
//! The facade only needs to POST a signed URL and body and read back the
//! status, headers and raw body. [`Transport`] abstracts that step so tests and
//! embedders can supply their own; [`HttpTransport`] is the reqwest-backed
//! implementation.
//!
//! [`Transport`] uses `#[async_trait]` so it can be held as `Arc<dyn Transport>`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use ssokit_auth::ProtocolError;
use tracing::debug;

/// Raw reply to a transported call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body, exactly as received.
    pub body: Bytes,
}

/// Sends a signed request and returns the raw reply.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// POST `body` to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportFailure`] if the call cannot be
    /// completed. Non-2xx statuses are returned, not raised.
    async fn send(&self, url: &str, body: String) -> Result<TransportResponse, ProtocolError>;
}

/// HTTPS transport built on `reqwest`.
///
/// Redirects are followed and server certificates are always validated.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportFailure`] if the HTTP client cannot
    /// be initialised.
    pub fn new(timeout: Duration) -> Result<Self, ProtocolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProtocolError::TransportFailure(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, body: String) -> Result<TransportResponse, ProtocolError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ProtocolError::TransportFailure(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProtocolError::TransportFailure(format!("cannot read response body: {e}")))?;

        debug!(%status, body_len = body.len(), "received response");

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
