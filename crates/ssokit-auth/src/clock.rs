//! Injectable wall clock and replay windows.
//!
//! Verifiers never trust a message's timestamp except as a signed value; they
//! compare it against their own [`Clock`]. A [`ReplayWindow`] bounds how far in
//! the past or future a signed timestamp may lie.

use std::fmt;

use crate::error::ProtocolError;

/// Source of the current unix time in seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current unix time in seconds.
    fn now(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock frozen at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

/// Acceptance window around the verifier's clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayWindow {
    /// How far in the past a timestamp may lie.
    pub past: i64,
    /// How far in the future a timestamp may lie.
    pub future: i64,
}

impl ReplayWindow {
    /// Window for synchronous server-to-server calls and their responses.
    pub const API_CALL: Self = Self {
        past: 150,
        future: 150,
    };

    /// Window for browser redirects, which may sit on a login page for a while.
    pub const REDIRECT: Self = Self {
        past: 3600,
        future: 600,
    };

    /// Accept `timestamp` if `now - past <= timestamp <= now + future`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::SignatureMismatch`] naming the accepted range.
    ///
    /// # Examples
    ///
    /// ```
    /// use ssokit_auth::clock::ReplayWindow;
    ///
    /// assert!(ReplayWindow::API_CALL.check(1_000 - 150, 1_000).is_ok());
    /// assert!(ReplayWindow::API_CALL.check(1_000 + 151, 1_000).is_err());
    /// ```
    pub fn check(&self, timestamp: i64, now: i64) -> Result<(), ProtocolError> {
        let earliest = now.saturating_sub(self.past);
        let latest = now.saturating_add(self.future);
        if timestamp < earliest || timestamp > latest {
            return Err(ProtocolError::SignatureMismatch(format!(
                "timestamp ({timestamp}) out of range ({earliest}-{latest})"
            )));
        }
        Ok(())
    }
}
