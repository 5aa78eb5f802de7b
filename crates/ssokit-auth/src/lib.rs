//! Shared-secret signed messages for single sign-on.
//!
//! This crate implements both sides of a small authentication protocol between
//! a client application and an identity endpoint that share an api key and an
//! api secret. Three message kinds are signed with HMAC over a canonical byte
//! string and checked against a timestamp window:
//!
//! - [`SignedRequest`] - a server-to-server API call (POST, JSON body)
//! - [`SignedResponse`] - the reply to an API call (signature in a header)
//! - [`SignedRedirect`] - a browser redirect carrying its payload in the URL
//!
//! Construction and verification are pure functions of their inputs, the
//! credentials and a [`Clock`], and are safe to run concurrently.
//!
//! # Usage
//!
//! ```rust
//! use serde_json::json;
//! use ssokit_auth::{Credentials, FixedClock, SignedRequest};
//!
//! let creds = Credentials::new("https://sso.example.com", "k1", "s1");
//! let payload = json!({"token": "abc"}).as_object().unwrap().clone();
//!
//! let encoded = SignedRequest::new("k1", "/user/fetch", payload, 1_700_000_000)
//!     .create_request(&creds)
//!     .unwrap();
//!
//! // The endpoint verifies with the same credentials and its own clock.
//! let parsed = SignedRequest::parse_request(
//!     &creds,
//!     &FixedClock(1_700_000_010),
//!     &encoded.url,
//!     encoded.body.as_bytes(),
//! )
//! .unwrap();
//! assert_eq!(parsed.payload["token"], "abc");
//! ```
//!
//! # Modules
//!
//! - [`canonical`] - Canonical string construction and query handling
//! - [`clock`] - Injectable clock and replay windows
//! - [`credentials`] - Credentials, secret handling and credential lookup
//! - [`error`] - Protocol error taxonomy
//! - [`payload`] - Payload type
//! - [`redirect`] - Signed browser redirects
//! - [`request`] - Signed API requests
//! - [`response`] - Signed API responses
//! - [`signature`] - HMAC signing and constant-time verification

pub mod canonical;
pub mod clock;
pub mod credentials;
pub mod error;
pub mod payload;
pub mod redirect;
pub mod request;
pub mod response;
pub mod signature;

pub use clock::{Clock, FixedClock, ReplayWindow, SystemClock};
pub use credentials::{ApiSecret, CredentialProvider, Credentials, StaticCredentialProvider};
pub use error::{ConfigError, ErrorCategory, ProtocolError, ProtocolResult, parse_setting};
pub use payload::Payload;
pub use redirect::SignedRedirect;
pub use request::{EncodedRequest, SignedRequest};
pub use response::{EncodedResponse, ResultCode, SIGNATURE_HEADER, SignedResponse};
