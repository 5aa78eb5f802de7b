//! In-memory user directory for the reference endpoint.
//!
//! Login tokens are single use: a `{token}` lookup consumes the token and
//! issues an access token, which can then be used for any number of
//! `{access_token}` lookups. Both kinds of token are bound to the api key
//! they were issued to and expire after a fixed lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use ssokit_auth::{Clock, Payload, ResultCode, SignedRedirect, SignedRequest, SystemClock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handler::{CallOutcome, HandlerFuture, SsoHandler};

/// Path of the user lookup call.
pub const FETCH_PATH: &str = "/user/fetch";

/// Lifetime of an unredeemed login token: one hour.
pub const LOGIN_TOKEN_TTL_SECS: i64 = 3_600;

/// Lifetime of an access token: one day.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 86_400;

/// Minimum time between two sweeps of expired tokens.
const SWEEP_INTERVAL_SECS: i64 = 60;

/// A user known to the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryUser {
    /// Numeric user ID.
    pub user_id: i64,
    /// Key-value metadata (e-mail address and the like).
    pub metadata: Payload,
}

#[derive(Debug, Clone)]
struct Grant {
    api_key: String,
    user_id: i64,
    expires_at: i64,
}

impl Grant {
    fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// Directory that logs every browser in as one configured user.
#[derive(Debug)]
pub struct UserDirectory {
    user: DirectoryUser,
    clock: Arc<dyn Clock>,
    login_tokens: DashMap<String, Grant>,
    access_tokens: DashMap<String, Grant>,
    last_sweep: AtomicI64,
}

impl UserDirectory {
    /// Create a directory for `user` on the system clock.
    #[must_use]
    pub fn new(user: DirectoryUser) -> Self {
        Self::with_clock(user, Arc::new(SystemClock))
    }

    /// Create a directory for `user` that ages tokens by `clock`.
    #[must_use]
    pub fn with_clock(user: DirectoryUser, clock: Arc<dyn Clock>) -> Self {
        Self {
            user,
            clock,
            login_tokens: DashMap::new(),
            access_tokens: DashMap::new(),
            last_sweep: AtomicI64::new(i64::MIN),
        }
    }

    /// Issue a one-time login token for the configured user, redeemable only
    /// by `api_key`.
    #[must_use]
    pub fn issue_login_token(&self, api_key: &str) -> String {
        let now = self.clock.now();
        self.sweep_expired(now);

        let token = Uuid::new_v4().simple().to_string();
        self.login_tokens.insert(
            token.clone(),
            Grant {
                api_key: api_key.to_owned(),
                user_id: self.user.user_id,
                expires_at: now.saturating_add(LOGIN_TOKEN_TTL_SECS),
            },
        );
        token
    }

    /// Number of login and access tokens currently held.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.login_tokens.len() + self.access_tokens.len()
    }

    /// Answer a verified call synchronously.
    #[must_use]
    pub fn answer(&self, request: &SignedRequest) -> CallOutcome {
        if request.request_uri != FETCH_PATH {
            return CallOutcome::failure(
                ResultCode::Error,
                format!("unknown call {}", request.request_uri),
            );
        }

        let now = self.clock.now();
        self.sweep_expired(now);

        if let Some(token) = string_field(&request.payload, "token") {
            return self.redeem_login_token(token, &request.api_key, now);
        }

        if let Some(access_token) = string_field(&request.payload, "access_token") {
            let grant = self
                .access_tokens
                .get(access_token)
                .map(|grant| grant.value().clone())
                .filter(|grant| grant.is_live(now));
            return match grant {
                Some(grant) if grant.api_key == request.api_key => {
                    debug!(user_id = grant.user_id, "access token lookup");
                    CallOutcome::success(self.user_payload(grant.user_id))
                }
                Some(_) => {
                    warn!(api_key = %request.api_key, "access token presented by another client");
                    CallOutcome::failure(ResultCode::Error, "unknown access token")
                }
                None => CallOutcome::failure(ResultCode::Error, "unknown access token"),
            };
        }

        CallOutcome::failure(ResultCode::Incomplete, "token or access_token required")
    }

    fn redeem_login_token(&self, token: &str, api_key: &str, now: i64) -> CallOutcome {
        // A token offered by the wrong client stays redeemable by its owner.
        let Some((_, grant)) = self
            .login_tokens
            .remove_if(token, |_, grant| grant.api_key == api_key && grant.is_live(now))
        else {
            if self.login_tokens.contains_key(token) {
                warn!(api_key, "login token presented by another client");
            }
            return CallOutcome::failure(ResultCode::Error, "unknown or expired login token");
        };

        let access_token = Uuid::new_v4().simple().to_string();
        self.access_tokens.insert(
            access_token.clone(),
            Grant {
                api_key: grant.api_key,
                user_id: grant.user_id,
                expires_at: now.saturating_add(ACCESS_TOKEN_TTL_SECS),
            },
        );
        info!(user_id = grant.user_id, api_key, "login token redeemed");

        let mut payload = self.user_payload(grant.user_id);
        payload.insert("access_token".to_owned(), Value::String(access_token));
        CallOutcome::success(payload)
    }

    fn user_payload(&self, user_id: i64) -> Payload {
        let mut payload = Payload::new();
        payload.insert("user_id".to_owned(), Value::from(user_id));
        payload.insert(
            "metadata".to_owned(),
            Value::Object(self.user.metadata.clone()),
        );
        payload
    }

    fn sweep_expired(&self, now: i64) {
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < SWEEP_INTERVAL_SECS
            || self
                .last_sweep
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            return;
        }
        self.login_tokens.retain(|_, grant| grant.is_live(now));
        self.access_tokens.retain(|_, grant| grant.is_live(now));
    }
}

impl SsoHandler for UserDirectory {
    fn handle_call(&self, request: SignedRequest) -> HandlerFuture<CallOutcome> {
        let outcome = self.answer(&request);
        Box::pin(async move { outcome })
    }

    fn begin_login(&self, redirect: SignedRedirect) -> HandlerFuture<Option<String>> {
        let token = self.issue_login_token(&redirect.api_key);
        Box::pin(async move { Some(token) })
    }
}

fn string_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
