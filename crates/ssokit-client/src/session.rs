//! User-session facade.
//!
//! [`SsoClient`] composes signed redirects, requests and responses into the
//! two things a client application does with an identity endpoint: send the
//! browser to log in, then exchange the returned token for user data.
//!
//! Protocol failures (tampering, stale messages, missing fields, transport
//! errors) are returned as `Err(ProtocolError)`. Business outcomes reported by
//! the endpoint (`INVALID`, `INCOMPLETE`, `ERROR`) are `Ok` results with
//! `success == false`, the result code and the endpoint's diagnostic message.

use std::sync::Arc;

use serde_json::Value;
use ssokit_auth::{
    Clock, Credentials, Payload, ProtocolError, ProtocolResult, ResultCode, SignedRedirect,
    SignedRequest, SignedResponse, SystemClock,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::transport::Transport;

/// Endpoint path the browser is sent to for logging in.
pub const LOGIN_PATH: &str = "/user/login";

/// Endpoint path for token and access-token lookups.
pub const FETCH_PATH: &str = "/user/fetch";

/// Outcome of [`SsoClient::finalise_login`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoginResult {
    /// Whether the endpoint reported `SUCCESS`.
    pub success: bool,
    /// Numeric user ID.
    pub user_id: Option<i64>,
    /// Token for later [`SsoClient::fetch_user`] calls.
    pub access_token: Option<String>,
    /// User metadata. Not every field is set for every user.
    pub metadata: Option<Payload>,
    /// Result code reported by the endpoint.
    pub result: ResultCode,
    /// Diagnostic message reported by the endpoint.
    pub message: String,
}

/// Outcome of [`SsoClient::fetch_user`].
#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    /// Whether the endpoint reported `SUCCESS`.
    pub success: bool,
    /// Numeric user ID.
    pub user_id: Option<i64>,
    /// User metadata. Not every field is set for every user.
    pub metadata: Option<Payload>,
    /// Result code reported by the endpoint.
    pub result: ResultCode,
    /// Diagnostic message reported by the endpoint.
    pub message: String,
}

/// Client for a shared-secret identity endpoint.
#[derive(Debug, Clone)]
pub struct SsoClient {
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl SsoClient {
    /// Create a client using the system clock.
    pub fn new(credentials: Credentials, transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials,
            transport,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for signing and verification.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The client's credentials.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Build the URL to send the browser to for logging in.
    ///
    /// After login the endpoint redirects to `return_url` with a `token`
    /// query parameter for [`SsoClient::finalise_login`].
    #[must_use]
    pub fn start_login(&self, return_url: &str, iframe: bool) -> String {
        let mut payload = Payload::new();
        payload.insert("returnUrl".to_owned(), Value::String(return_url.to_owned()));
        payload.insert("iframe".to_owned(), Value::from(i32::from(iframe)));
        self.redirect(LOGIN_PATH, payload, None)
    }

    /// Exchange a login token for the user's identity and an access token.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the call or its verification fails.
    pub async fn finalise_login(&self, token: &str) -> ProtocolResult<LoginResult> {
        let response = self.call_fetch("token", token).await?;
        let result = if response.result.is_success() {
            LoginResult {
                success: true,
                user_id: user_id(&response.payload),
                access_token: response
                    .payload
                    .get("access_token")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                metadata: metadata(&response.payload),
                result: response.result,
                message: response.message,
            }
        } else {
            LoginResult {
                success: false,
                user_id: None,
                access_token: None,
                metadata: None,
                result: response.result,
                message: response.message,
            }
        };
        info!(success = result.success, result = %result.result, "finalised login");
        Ok(result)
    }

    /// Fetch the user's identity with an access token.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the call or its verification fails.
    pub async fn fetch_user(&self, access_token: &str) -> ProtocolResult<UserData> {
        let response = self.call_fetch("access_token", access_token).await?;
        let success = response.result.is_success();
        Ok(UserData {
            success,
            user_id: success.then(|| user_id(&response.payload)).flatten(),
            metadata: success.then(|| metadata(&response.payload)).flatten(),
            result: response.result,
            message: response.message,
        })
    }

    /// Build a signed redirect URL to `uri` on the endpoint.
    ///
    /// `timestamp` defaults to the client's clock.
    #[must_use]
    pub fn redirect(&self, uri: &str, payload: Payload, timestamp: Option<i64>) -> String {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        SignedRedirect::new(self.credentials.api_key(), uri, payload, timestamp)
            .create_url(&self.credentials)
    }

    /// Send a signed API call to `uri` and verify the reply.
    ///
    /// `timestamp` defaults to the client's clock.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TransportFailure`] if the call fails or the status is not 2xx
    /// - any verification error raised by [`SignedResponse::parse_response`]
    pub async fn request(
        &self,
        uri: &str,
        payload: Payload,
        request_id: Option<&str>,
        timestamp: Option<i64>,
    ) -> ProtocolResult<SignedResponse> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let mut request = SignedRequest::new(self.credentials.api_key(), uri, payload, timestamp);
        if let Some(id) = request_id {
            request = request.with_request_id(id);
        }
        let encoded = request.create_request(&self.credentials)?;

        debug!(request_uri = %request.request_uri, request_id = ?request.request_id, "sending signed request");
        let reply = self.transport.send(&encoded.url, encoded.body).await?;
        if !reply.status.is_success() {
            return Err(ProtocolError::TransportFailure(format!(
                "HTTP status code {}",
                reply.status.as_u16()
            )));
        }

        SignedResponse::parse_response(&self.credentials, self.clock.as_ref(), &reply.headers, &reply.body)
    }

    async fn call_fetch(&self, key: &str, value: &str) -> ProtocolResult<SignedResponse> {
        let mut payload = Payload::new();
        payload.insert(key.to_owned(), Value::String(value.to_owned()));
        let request_id = Uuid::new_v4().to_string();
        self.request(FETCH_PATH, payload, Some(&request_id), None).await
    }
}

fn user_id(payload: &Payload) -> Option<i64> {
    match payload.get("user_id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn metadata(payload: &Payload) -> Option<Payload> {
    payload.get("metadata").and_then(Value::as_object).cloned()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use http::StatusCode;
    use serde_json::json;
    use ssokit_auth::FixedClock;

    use super::*;
    use crate::transport::TransportResponse;

    const NOW: i64 = 1_700_000_000;
    const ENDPOINT: &str = "https://sso.example.com";

    /// Plays the endpoint: verifies the request and answers with a canned reply.
    #[derive(Debug)]
    struct ScriptedEndpoint {
        credentials: Credentials,
        result: ResultCode,
        payload: Payload,
        status: StatusCode,
        tamper: bool,
        seen: Mutex<Vec<SignedRequest>>,
    }

    impl ScriptedEndpoint {
        fn new(result: ResultCode, payload: serde_json::Value) -> Self {
            Self {
                credentials: Credentials::new(ENDPOINT, "k1", "s1"),
                result,
                payload: payload.as_object().cloned().unwrap_or_default(),
                status: StatusCode::OK,
                tamper: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedEndpoint {
        async fn send(&self, url: &str, body: String) -> Result<TransportResponse, ProtocolError> {
            let request =
                SignedRequest::parse_request(&self.credentials, &FixedClock(NOW), url, body.as_bytes())?;
            let response = SignedResponse::builder()
                .api_key(self.credentials.api_key())
                .timestamp(NOW)
                .response_id(1)
                .request_id(request.request_id.clone())
                .result(self.result)
                .message(if self.result.is_success() { "" } else { "rejected" })
                .payload(self.payload.clone())
                .build();
            self.seen.lock().unwrap().push(request);

            let encoded = response.create_response(self.credentials.api_secret())?;
            let mut body = encoded.body.clone().into_bytes();
            if self.tamper {
                body[1] ^= 0x01;
            }
            Ok(TransportResponse {
                status: self.status,
                headers: encoded.headers()?,
                body: Bytes::from(body),
            })
        }
    }

    fn client(endpoint: ScriptedEndpoint) -> (SsoClient, Arc<ScriptedEndpoint>) {
        let endpoint = Arc::new(endpoint);
        let client = SsoClient::new(Credentials::new(ENDPOINT, "k1", "s1"), endpoint.clone())
            .with_clock(Arc::new(FixedClock(NOW)));
        (client, endpoint)
    }

    #[test]
    fn test_should_build_signed_login_redirect() {
        let (client, endpoint) = client(ScriptedEndpoint::new(ResultCode::Success, json!({})));
        let url = client.start_login("https://app.example.com/cb", true);
        assert!(url.starts_with("https://sso.example.com/user/login?returnUrl="));

        let redirect =
            SignedRedirect::parse_url(&endpoint.credentials, &FixedClock(NOW), &url).unwrap();
        assert_eq!(redirect.payload["returnUrl"], "https://app.example.com/cb");
        assert_eq!(redirect.payload["iframe"], "1");
    }

    #[test]
    fn test_should_encode_iframe_flag_as_zero() {
        let (client, _) = client(ScriptedEndpoint::new(ResultCode::Success, json!({})));
        assert!(client.start_login("https://app/cb", false).contains("&iframe=0&"));
    }

    #[tokio::test]
    async fn test_should_fetch_user_on_success() {
        let (client, endpoint) = client(ScriptedEndpoint::new(
            ResultCode::Success,
            json!({"user_id": 42, "metadata": {"email": "a@example.com"}}),
        ));

        let user = client.fetch_user("at-1").await.unwrap();
        assert!(user.success);
        assert_eq!(user.user_id, Some(42));
        assert_eq!(user.metadata.unwrap()["email"], "a@example.com");

        let seen = endpoint.seen.lock().unwrap();
        assert_eq!(seen[0].request_uri, FETCH_PATH);
        assert_eq!(seen[0].payload["access_token"], "at-1");
        assert!(seen[0].request_id.is_some());
    }

    #[tokio::test]
    async fn test_should_finalise_login_with_access_token() {
        let (client, endpoint) = client(ScriptedEndpoint::new(
            ResultCode::Success,
            json!({"user_id": "7", "access_token": "at-9", "metadata": {}}),
        ));

        let login = client.finalise_login("tok").await.unwrap();
        assert!(login.success);
        assert_eq!(login.user_id, Some(7));
        assert_eq!(login.access_token.as_deref(), Some("at-9"));
        assert_eq!(endpoint.seen.lock().unwrap()[0].payload["token"], "tok");
    }

    #[tokio::test]
    async fn test_should_surface_business_failure_without_fields() {
        let (client, _) = client(ScriptedEndpoint::new(
            ResultCode::Error,
            json!({"user_id": 42}),
        ));

        let login = client.finalise_login("expired").await.unwrap();
        assert!(!login.success);
        assert_eq!(login.user_id, None);
        assert_eq!(login.result, ResultCode::Error);
        assert_eq!(login.message, "rejected");
    }

    #[tokio::test]
    async fn test_should_reject_tampered_response() {
        let mut endpoint = ScriptedEndpoint::new(ResultCode::Success, json!({"user_id": 42}));
        endpoint.tamper = true;
        let (client, _) = client(endpoint);

        let result = client.fetch_user("at-1").await;
        assert!(matches!(result, Err(ProtocolError::SignatureMismatch(_))));
    }

    #[tokio::test]
    async fn test_should_map_non_success_status_to_transport_failure() {
        let mut endpoint = ScriptedEndpoint::new(ResultCode::Success, json!({}));
        endpoint.status = StatusCode::BAD_GATEWAY;
        let (client, _) = client(endpoint);

        let result = client.fetch_user("at-1").await;
        assert_eq!(
            result,
            Err(ProtocolError::TransportFailure("HTTP status code 502".to_owned()))
        );
    }

    #[tokio::test]
    async fn test_should_propagate_rejection_of_foreign_api_key() {
        let (_, endpoint) = client(ScriptedEndpoint::new(ResultCode::Success, json!({})));
        let other = SsoClient::new(Credentials::new(ENDPOINT, "k2", "s1"), endpoint)
            .with_clock(Arc::new(FixedClock(NOW)));

        let result = other.fetch_user("at-1").await;
        assert!(matches!(result, Err(ProtocolError::ApiKeyMismatch(_))));
    }

    #[tokio::test]
    async fn test_should_pass_explicit_request_id_and_timestamp() {
        let (client, endpoint) = client(ScriptedEndpoint::new(ResultCode::Success, json!({})));

        let response = client
            .request("user/fetch", Payload::new(), Some("r-42"), Some(NOW - 10))
            .await
            .unwrap();
        assert_eq!(response.request_id.as_deref(), Some("r-42"));

        let seen = endpoint.seen.lock().unwrap();
        assert_eq!(seen[0].timestamp, NOW - 10);
        assert_eq!(seen[0].request_uri, "/user/fetch");
    }
}
