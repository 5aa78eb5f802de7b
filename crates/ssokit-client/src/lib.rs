//! Client side of shared-secret single sign-on.
//!
//! A client application sends the browser to the identity endpoint with a
//! signed redirect, receives a one-time token on its return URL, and exchanges
//! that token for the user's identity through signed API calls.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ssokit_client::{HttpTransport, SsoClient, SsoConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SsoConfig::from_env()?;
//! let transport = HttpTransport::new(config.request_timeout())?;
//! let client = SsoClient::new(config.credentials()?, Arc::new(transport));
//!
//! let login_url = client.start_login("https://app.example.com/sso/return", false);
//! // ... redirect the browser, then on return:
//! let login = client.finalise_login("token-from-return-url").await?;
//! if login.success {
//!     println!("user {:?}", login.user_id);
//! }
//! # let _ = login_url;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod session;
pub mod transport;

pub use config::SsoConfig;
pub use session::{FETCH_PATH, LOGIN_PATH, LoginResult, SsoClient, UserData};
pub use transport::{HttpTransport, Transport, TransportResponse};
