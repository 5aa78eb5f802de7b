//! Reference identity endpoint for shared-secret single sign-on.
//!
//! This crate serves the endpoint side of the protocol over HTTP: it verifies
//! signed login redirects and API calls, deduplicates calls by request ID and
//! answers with signed responses. Identity logic sits behind the
//! [`SsoHandler`] trait; [`UserDirectory`] is an in-memory implementation.
//!
//! # Modules
//!
//! - [`config`] - Environment-driven endpoint configuration
//! - [`dedup`] - Time-windowed request-ID store
//! - [`directory`] - In-memory user directory
//! - [`handler`] - Handler trait and call outcomes
//! - [`server`] - Accept loop with graceful shutdown
//! - [`service`] - The hyper service

pub mod config;
pub mod dedup;
pub mod directory;
pub mod handler;
pub mod server;
pub mod service;

pub use config::ServerConfig;
pub use dedup::{Claim, RequestIdStore, StoredReply};
pub use directory::{DirectoryUser, UserDirectory};
pub use handler::{CallOutcome, HandlerFuture, SsoHandler};
pub use server::serve;
pub use service::{SsoHttpConfig, SsoHttpService};
