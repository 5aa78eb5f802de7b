//! The identity endpoint's hyper `Service`.
//!
//! [`SsoHttpService`] verifies every incoming message before handing it to an
//! [`SsoHandler`]. It handles:
//!
//! 1. Health check interception (`GET /health`)
//! 2. Login redirects (`GET /user/login?...&signature=...`), answered with a
//!    `302` to the caller's `returnUrl` carrying a one-time `token`
//! 3. Signed API calls (`POST <path>?signature=...`), answered with a signed
//!    response
//! 4. Request-ID deduplication
//!
//! Verification failures on API calls whose credentials can be resolved are
//! answered with a signed response (`INVALID` for security failures,
//! `INCOMPLETE` for missing fields, `ERROR` otherwise) so the caller can tell
//! them apart from network trouble. When no credentials can be resolved the
//! reply is a plain `403`.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue, LOCATION};
use http::uri::PathAndQuery;
use http::{Method, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use serde_json::Value;
use ssokit_auth::canonical::{push_query_separator, relative_uri};
use ssokit_auth::{
    Clock, CredentialProvider, Credentials, ErrorCategory, ProtocolError, ResultCode,
    SignedRedirect, SignedRequest, SignedResponse, SystemClock,
};
use tracing::{debug, error, info, warn};

use crate::dedup::{Claim, RequestIdStore, StoredReply};
use crate::handler::{CallOutcome, SsoHandler};

/// Response body type produced by the service.
pub type ResponseBody = Full<Bytes>;

/// Path of the login redirect.
pub const LOGIN_PATH: &str = "/user/login";

/// Path of the health check.
pub const HEALTH_PATH: &str = "/health";

/// Collaborators shared by every request.
#[derive(Clone)]
pub struct SsoHttpConfig {
    /// Resolves the credentials a message claims to be signed with.
    pub credential_provider: Arc<dyn CredentialProvider>,
    /// Clock used for timestamp windows and response timestamps.
    pub clock: Arc<dyn Clock>,
}

impl SsoHttpConfig {
    /// Create a configuration using the system clock.
    pub fn new(credential_provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credential_provider,
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for SsoHttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoHttpConfig")
            .field("credential_provider", &"...")
            .field("clock", &self.clock)
            .finish()
    }
}

/// The identity endpoint service.
///
/// # Type Parameters
///
/// - `H`: The identity logic implementing [`SsoHandler`].
#[derive(Debug)]
pub struct SsoHttpService<H: SsoHandler> {
    handler: Arc<H>,
    config: Arc<SsoHttpConfig>,
    store: Arc<RequestIdStore>,
    last_response_id: Arc<AtomicI64>,
}

impl<H: SsoHandler> Clone for SsoHttpService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            last_response_id: Arc::clone(&self.last_response_id),
        }
    }
}

impl<H: SsoHandler> SsoHttpService<H> {
    /// Create a service.
    #[must_use]
    pub fn new(handler: H, config: SsoHttpConfig, store: RequestIdStore) -> Self {
        Self::from_shared(Arc::new(handler), config, store)
    }

    /// Create a service from an `Arc<H>` handler.
    #[must_use]
    pub fn from_shared(handler: Arc<H>, config: SsoHttpConfig, store: RequestIdStore) -> Self {
        Self {
            handler,
            config: Arc::new(config),
            store: Arc::new(store),
            last_response_id: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Handle a request whose body has already been collected.
    pub async fn handle(&self, req: http::Request<Bytes>) -> Response<ResponseBody> {
        let (parts, body) = req.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map_or("/", PathAndQuery::as_str);
        debug!(method = %parts.method, path = parts.uri.path(), "processing request");

        match (&parts.method, parts.uri.path()) {
            (&Method::GET, HEALTH_PATH) => health_check_response(),
            (&Method::GET, path) => self.handle_login(path, target).await,
            (&Method::POST, _) => self.handle_call(target, &body).await,
            _ => plain_response(StatusCode::NOT_FOUND, "not found"),
        }
    }

    async fn handle_login(&self, path: &str, target: &str) -> Response<ResponseBody> {
        // The login path sits under the public endpoint, which may carry a prefix.
        let Some(credentials) = self.resolve(SignedRedirect::claimed_api_key(target)) else {
            return if path.ends_with(LOGIN_PATH) {
                plain_response(StatusCode::FORBIDDEN, "unknown api key")
            } else {
                plain_response(StatusCode::NOT_FOUND, "not found")
            };
        };
        if relative_uri(credentials.endpoint(), path) != LOGIN_PATH {
            return plain_response(StatusCode::NOT_FOUND, "not found");
        }

        let redirect =
            match SignedRedirect::parse_url(&credentials, self.config.clock.as_ref(), target) {
                Ok(redirect) => redirect,
                Err(err) => {
                    return plain_response(
                        StatusCode::FORBIDDEN,
                        format!("login request rejected: {}", err.kind()),
                    );
                }
            };

        let Some(mut location) = redirect
            .payload
            .get("returnUrl")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_owned)
        else {
            return plain_response(StatusCode::BAD_REQUEST, "returnUrl required");
        };

        let Some(token) = self.handler.begin_login(redirect).await else {
            return plain_response(StatusCode::FORBIDDEN, "login refused");
        };

        push_query_separator(&mut location);
        location.push_str("token=");
        location.extend(form_urlencoded::byte_serialize(token.as_bytes()));

        let Ok(location) = HeaderValue::from_str(&location) else {
            return plain_response(StatusCode::BAD_REQUEST, "invalid returnUrl");
        };
        info!(api_key = %credentials.api_key(), "login started");

        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::FOUND;
        response.headers_mut().insert(LOCATION, location);
        response
    }

    async fn handle_call(&self, target: &str, body: &[u8]) -> Response<ResponseBody> {
        let Some(credentials) = self.resolve(SignedRequest::claimed_api_key(target, body)) else {
            return plain_response(StatusCode::FORBIDDEN, "unknown api key");
        };
        let now = self.config.clock.now();

        let request =
            match SignedRequest::parse_request(&credentials, self.config.clock.as_ref(), target, body) {
                Ok(request) => request,
                Err(err) => {
                    let outcome = CallOutcome::failure(result_for(&err), err.to_string());
                    return signed_reply(&credentials, now, self.next_response_id(), None, &outcome, false);
                }
            };

        let request_id = request.request_id.clone();
        let mut pending = None;
        if let Some(id) = &request_id {
            match self.store.claim_pending(credentials.api_key(), id, now) {
                Ok(claim) => pending = Some(claim),
                Err(Claim::Duplicate(stored)) => {
                    return signed_reply(
                        &credentials,
                        now,
                        stored.response_id,
                        request_id.clone(),
                        &stored.outcome,
                        true,
                    );
                }
                Err(_) => {
                    let outcome =
                        CallOutcome::failure(ResultCode::Error, "request is already being processed");
                    return signed_reply(
                        &credentials,
                        now,
                        self.next_response_id(),
                        request_id.clone(),
                        &outcome,
                        true,
                    );
                }
            }
        }

        let request_uri = request.request_uri.clone();
        let outcome = self.handler.handle_call(request).await;
        let response_id = self.next_response_id();
        info!(
            request_uri = %request_uri,
            api_key = %credentials.api_key(),
            response_id,
            result = %outcome.result,
            "answered call"
        );

        if let Some(pending) = pending {
            pending.complete(StoredReply {
                response_id,
                outcome: outcome.clone(),
            });
        }

        signed_reply(&credentials, now, response_id, request_id, &outcome, false)
    }

    fn resolve(&self, api_key: Option<String>) -> Option<Arc<Credentials>> {
        let api_key = api_key?;
        match self.config.credential_provider.get_credentials(&api_key) {
            Ok(credentials) => Some(credentials),
            Err(err) => {
                warn!(api_key = %api_key, error = %err, "cannot resolve credentials");
                None
            }
        }
    }

    fn next_response_id(&self) -> i64 {
        self.last_response_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl<H: SsoHandler> Service<http::Request<Incoming>> for SsoHttpService<H> {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let service = self.clone();

        Box::pin(async move {
            let (parts, incoming) = req.into_parts();
            let body = match incoming.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => {
                    error!(error = %err, "failed to collect request body");
                    return Ok(plain_response(
                        StatusCode::BAD_REQUEST,
                        "cannot read request body",
                    ));
                }
            };
            Ok(service.handle(http::Request::from_parts(parts, body)).await)
        })
    }
}

/// Map a verification failure to the result code reported to the caller.
fn result_for(err: &ProtocolError) -> ResultCode {
    match (err.category(), err) {
        (ErrorCategory::Security, _) => ResultCode::Invalid,
        (_, ProtocolError::DataIncomplete(_)) => ResultCode::Incomplete,
        _ => ResultCode::Error,
    }
}

fn signed_reply(
    credentials: &Credentials,
    now: i64,
    response_id: i64,
    request_id: Option<String>,
    outcome: &CallOutcome,
    duplicate: bool,
) -> Response<ResponseBody> {
    let response = SignedResponse::builder()
        .api_key(credentials.api_key())
        .timestamp(now)
        .response_id(response_id)
        .request_id(request_id)
        .result(outcome.result)
        .duplicate(duplicate)
        .message(outcome.message.clone())
        .payload(outcome.payload.clone())
        .build();

    let encoded = match response.create_response(credentials.api_secret()) {
        Ok(encoded) => encoded,
        Err(err) => {
            error!(error = %err, "failed to sign response");
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "cannot sign response");
        }
    };
    let headers = match encoded.headers() {
        Ok(headers) => headers,
        Err(err) => {
            error!(error = %err, "failed to build response headers");
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "cannot sign response");
        }
    };

    let mut reply = Response::new(Full::new(Bytes::from(encoded.body)));
    *reply.headers_mut() = headers;
    reply
}

fn plain_response(status: StatusCode, message: impl Into<String>) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from(message.into())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn health_check_response() -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from_static(br#"{"status":"running"}"#)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use ssokit_auth::{FixedClock, Payload, SIGNATURE_HEADER, StaticCredentialProvider};

    use super::*;
    use crate::directory::{DirectoryUser, UserDirectory};
    use crate::handler::HandlerFuture;

    const NOW: i64 = 1_700_000_000;
    const ENDPOINT: &str = "http://127.0.0.1:4580";

    fn creds() -> Credentials {
        Credentials::new(ENDPOINT, "k1", "s1")
    }

    fn service() -> SsoHttpService<UserDirectory> {
        service_for(vec![creds()])
    }

    fn service_for(clients: Vec<Credentials>) -> SsoHttpService<UserDirectory> {
        let directory = UserDirectory::with_clock(
            DirectoryUser {
                user_id: 42,
                metadata: Payload::new(),
            },
            Arc::new(FixedClock(NOW)),
        );
        SsoHttpService::new(directory, config_for(clients), RequestIdStore::default())
    }

    fn config_for(clients: Vec<Credentials>) -> SsoHttpConfig {
        SsoHttpConfig {
            credential_provider: Arc::new(StaticCredentialProvider::new(clients)),
            clock: Arc::new(FixedClock(NOW)),
        }
    }

    fn login_token(location: &str) -> String {
        let (_, query) = location.split_once('?').unwrap();
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn target(url: &str) -> &str {
        url.strip_prefix(ENDPOINT).unwrap()
    }

    async fn post(service: &SsoHttpService<UserDirectory>, url: &str, body: &str) -> Response<ResponseBody> {
        let req = http::Request::post(target(url))
            .body(Bytes::from(body.to_owned()))
            .unwrap();
        service.handle(req).await
    }

    async fn verified(response: Response<ResponseBody>) -> SignedResponse {
        assert_eq!(response.status(), StatusCode::OK);
        let (parts, body) = response.into_parts();
        let body = body.collect().await.unwrap().to_bytes();
        SignedResponse::parse_response(&creds(), &FixedClock(NOW), &parts.headers, &body).unwrap()
    }

    fn fetch_request(payload: serde_json::Value, request_id: &str) -> ssokit_auth::EncodedRequest {
        SignedRequest::new("k1", "/user/fetch", payload.as_object().unwrap().clone(), NOW)
            .with_request_id(request_id)
            .create_request(&creds())
            .unwrap()
    }

    #[tokio::test]
    async fn test_should_answer_health_check() {
        let req = http::Request::get(HEALTH_PATH).body(Bytes::new()).unwrap();
        let resp = service().handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"status":"running"}"#);
    }

    #[tokio::test]
    async fn test_should_redirect_login_with_token() {
        let payload = json!({"returnUrl": "https://app.example.com/cb?x=1", "iframe": 0});
        let url = SignedRedirect::new("k1", LOGIN_PATH, payload.as_object().unwrap().clone(), NOW)
            .create_url(&creds());

        let req = http::Request::get(target(&url)).body(Bytes::new()).unwrap();
        let resp = service().handle(req).await;

        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://app.example.com/cb?x=1&token="));
    }

    #[tokio::test]
    async fn test_should_route_login_under_endpoint_prefix() {
        let prefixed = Credentials::new(format!("{ENDPOINT}/sso"), "k1", "s1");
        let payload = json!({"returnUrl": "https://app.example.com/cb"});
        let url = SignedRedirect::new("k1", LOGIN_PATH, payload.as_object().unwrap().clone(), NOW)
            .create_url(&prefixed);
        assert!(url.starts_with("http://127.0.0.1:4580/sso/user/login?"));

        let service = service_for(vec![prefixed]);
        let req = http::Request::get(target(&url)).body(Bytes::new()).unwrap();
        assert_eq!(service.handle(req).await.status(), StatusCode::FOUND);

        let req = http::Request::get("/sso/user/logout?api_key=k1")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(service.handle(req).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_should_not_let_one_client_redeem_another_clients_token() {
        let k2 = Credentials::new(ENDPOINT, "k2", "s2");
        let service = service_for(vec![creds(), k2.clone()]);

        let payload = json!({"returnUrl": "https://app.example.com/cb"});
        let url = SignedRedirect::new("k1", LOGIN_PATH, payload.as_object().unwrap().clone(), NOW)
            .create_url(&creds());
        let req = http::Request::get(target(&url)).body(Bytes::new()).unwrap();
        let resp = service.handle(req).await;
        let token = login_token(resp.headers().get(LOCATION).unwrap().to_str().unwrap());

        let stolen = SignedRequest::new(
            "k2",
            "/user/fetch",
            json!({"token": &token}).as_object().unwrap().clone(),
            NOW,
        )
        .create_request(&k2)
        .unwrap();
        let resp = post(&service, &stolen.url, &stolen.body).await;
        let (parts, body) = resp.into_parts();
        let body = body.collect().await.unwrap().to_bytes();
        let reply = SignedResponse::parse_response(&k2, &FixedClock(NOW), &parts.headers, &body).unwrap();
        assert_eq!(reply.result, ResultCode::Error);
        assert!(reply.payload.is_empty());

        let owned = fetch_request(json!({"token": &token}), "r-own");
        let reply = verified(post(&service, &owned.url, &owned.body).await).await;
        assert_eq!(reply.result, ResultCode::Success);
        assert_eq!(reply.payload["user_id"], 42);
    }

    #[derive(Debug)]
    struct Stalled;

    impl SsoHandler for Stalled {
        fn handle_call(&self, _request: SignedRequest) -> HandlerFuture<CallOutcome> {
            Box::pin(std::future::pending::<CallOutcome>())
        }

        fn begin_login(&self, _redirect: SignedRedirect) -> HandlerFuture<Option<String>> {
            Box::pin(async { None })
        }
    }

    #[tokio::test]
    async fn test_should_release_request_id_when_call_is_cancelled() {
        let service = SsoHttpService::new(Stalled, config_for(vec![creds()]), RequestIdStore::default());
        let encoded = fetch_request(json!({"access_token": "a"}), "r-cancel");
        let req = http::Request::post(target(&encoded.url))
            .body(Bytes::from(encoded.body.clone()))
            .unwrap();

        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(20), service.handle(req)).await;
        assert!(cancelled.is_err());

        assert!(service.store.is_empty());
        assert_eq!(service.store.claim("k1", "r-cancel", NOW), Claim::New);
    }

    #[tokio::test]
    async fn test_should_refuse_stale_login_redirect() {
        let payload = json!({"returnUrl": "https://app.example.com/cb"});
        let url =
            SignedRedirect::new("k1", LOGIN_PATH, payload.as_object().unwrap().clone(), NOW - 3601)
                .create_url(&creds());

        let req = http::Request::get(target(&url)).body(Bytes::new()).unwrap();
        assert_eq!(service().handle(req).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_should_answer_signed_call() {
        let service = service();
        let encoded = fetch_request(json!({"access_token": "unknown"}), "r-1");

        let reply = verified(post(&service, &encoded.url, &encoded.body).await).await;
        assert_eq!(reply.result, ResultCode::Error);
        assert_eq!(reply.request_id.as_deref(), Some("r-1"));
        assert_eq!(reply.response_id, 1);
        assert!(!reply.duplicate);
    }

    #[tokio::test]
    async fn test_should_replay_stored_reply_for_duplicate_request_id() {
        let service = service();
        let token = service.handler.issue_login_token("k1");
        let encoded = fetch_request(json!({"token": token}), "r-dup");

        let first = verified(post(&service, &encoded.url, &encoded.body).await).await;
        let second = verified(post(&service, &encoded.url, &encoded.body).await).await;

        assert_eq!(first.result, ResultCode::Success);
        assert!(second.duplicate);
        assert_eq!(second.result, ResultCode::Success);
        assert_eq!(second.response_id, first.response_id);
        assert_eq!(second.payload, first.payload);
    }

    #[tokio::test]
    async fn test_should_answer_tampered_call_with_signed_invalid() {
        let encoded = fetch_request(json!({"access_token": "a"}), "r-2");
        let tampered = encoded.body.replace("\"a\"", "\"b\"");

        let reply = verified(post(&service(), &encoded.url, &tampered).await).await;
        assert_eq!(reply.result, ResultCode::Invalid);
        assert_eq!(reply.request_id, None);
    }

    #[tokio::test]
    async fn test_should_answer_missing_payload_with_incomplete() {
        let body = r#"{"api_key":"k1","timestamp":1700000000}"#;
        let sig = ssokit_auth::signature::sign(format!("/user/fetch{body}").as_bytes(), b"s1");
        let url = format!("{ENDPOINT}/user/fetch?signature={sig}");

        let reply = verified(post(&service(), &url, body).await).await;
        assert_eq!(reply.result, ResultCode::Incomplete);
    }

    #[tokio::test]
    async fn test_should_refuse_unknown_api_key_without_signature() {
        let other = Credentials::new(ENDPOINT, "k9", "s9");
        let encoded = SignedRequest::new("k9", "/user/fetch", Payload::new(), NOW)
            .create_request(&other)
            .unwrap();

        let resp = post(&service(), &encoded.url, &encoded.body).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(!resp.headers().contains_key(SIGNATURE_HEADER));
    }

    #[tokio::test]
    async fn test_should_return_not_found_for_unknown_route() {
        let req = http::Request::get("/nope").body(Bytes::new()).unwrap();
        assert_eq!(service().handle(req).await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_should_map_errors_to_result_codes() {
        assert_eq!(
            result_for(&ProtocolError::SignatureMismatch(String::new())),
            ResultCode::Invalid
        );
        assert_eq!(
            result_for(&ProtocolError::ApiKeyMismatch(String::new())),
            ResultCode::Invalid
        );
        assert_eq!(
            result_for(&ProtocolError::DataIncomplete(String::new())),
            ResultCode::Incomplete
        );
        assert_eq!(
            result_for(&ProtocolError::DataCorrupt(String::new())),
            ResultCode::Error
        );
    }

    #[test]
    fn test_should_debug_format_config_without_provider_details() {
        let config = SsoHttpConfig::new(Arc::new(StaticCredentialProvider::new(vec![creds()])));
        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("SsoHttpConfig"));
        assert!(!debug_str.contains("s1"));
    }
}
