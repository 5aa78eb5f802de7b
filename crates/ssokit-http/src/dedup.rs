//! Time-windowed request-ID store.
//!
//! Callers may attach a `request_id` to an API call; a second call with the
//! same ID from the same api key inside the window is answered from the
//! store instead of being processed again. A claim that is abandoned before
//! completion is released through [`PendingClaim`], so the caller can retry.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::handler::CallOutcome;

/// Default retention window: 24 hours.
pub const DEFAULT_WINDOW_SECS: i64 = 86_400;

/// Minimum time between two sweeps of expired request IDs.
const SWEEP_INTERVAL_SECS: i64 = 60;

/// A reply kept for re-sending to duplicate requests.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReply {
    /// Response ID of the original reply.
    pub response_id: i64,
    /// The original outcome.
    pub outcome: CallOutcome,
}

/// Result of [`RequestIdStore::claim`].
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// First sighting; the caller must process the request and then
    /// [`RequestIdStore::complete`] it.
    New,
    /// Already processed; re-send this reply.
    Duplicate(StoredReply),
    /// Another delivery of this request is still being processed.
    InFlight,
}

#[derive(Debug)]
struct Slot {
    claimed_at: i64,
    reply: Option<StoredReply>,
}

type SlotKey = (String, String);

/// Concurrent request-ID store keyed by `(api_key, request_id)`.
#[derive(Debug)]
pub struct RequestIdStore {
    window_secs: i64,
    slots: DashMap<SlotKey, Slot>,
    last_sweep: AtomicI64,
}

impl Default for RequestIdStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS)
    }
}

impl RequestIdStore {
    /// Create a store that forgets request IDs after `window_secs`.
    #[must_use]
    pub fn new(window_secs: i64) -> Self {
        Self {
            window_secs,
            slots: DashMap::new(),
            last_sweep: AtomicI64::new(i64::MIN),
        }
    }

    /// Claim a request ID at time `now`.
    ///
    /// Slots older than the window count as absent even before a sweep has
    /// removed them.
    pub fn claim(&self, api_key: &str, request_id: &str, now: i64) -> Claim {
        self.sweep_expired(now);
        let fresh = Slot {
            claimed_at: now,
            reply: None,
        };
        match self.slots.entry((api_key.to_owned(), request_id.to_owned())) {
            Entry::Occupied(mut slot) if self.is_expired(slot.get(), now) => {
                slot.insert(fresh);
                Claim::New
            }
            Entry::Occupied(slot) => match &slot.get().reply {
                Some(reply) => {
                    debug!(api_key, request_id, "duplicate request");
                    Claim::Duplicate(reply.clone())
                }
                None => Claim::InFlight,
            },
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Claim::New
            }
        }
    }

    /// Claim a request ID and return a guard that releases the claim unless it
    /// is completed.
    ///
    /// Returns the [`Claim`] unchanged when it is not [`Claim::New`].
    pub fn claim_pending(
        &self,
        api_key: &str,
        request_id: &str,
        now: i64,
    ) -> Result<PendingClaim<'_>, Claim> {
        match self.claim(api_key, request_id, now) {
            Claim::New => Ok(PendingClaim {
                store: self,
                key: Some((api_key.to_owned(), request_id.to_owned())),
            }),
            other => Err(other),
        }
    }

    /// Record the reply for a request previously claimed as [`Claim::New`].
    pub fn complete(&self, api_key: &str, request_id: &str, reply: StoredReply) {
        if let Some(mut slot) = self
            .slots
            .get_mut(&(api_key.to_owned(), request_id.to_owned()))
        {
            slot.reply = Some(reply);
        }
    }

    /// Forget a claim that was never completed. Completed slots are kept.
    pub fn release(&self, api_key: &str, request_id: &str) {
        let key = (api_key.to_owned(), request_id.to_owned());
        if self
            .slots
            .remove_if(&key, |_, slot| slot.reply.is_none())
            .is_some()
        {
            debug!(api_key, request_id, "released abandoned request");
        }
    }

    /// Number of request IDs currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn is_expired(&self, slot: &Slot, now: i64) -> bool {
        slot.claimed_at <= now.saturating_sub(self.window_secs)
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
        self.slots.retain(|_, slot| !self.is_expired(slot, now));
    }
}

/// A [`Claim::New`] that has not been completed yet.
///
/// Dropping the guard without calling [`PendingClaim::complete`] (the request
/// future was cancelled, or the handler panicked) releases the request ID.
#[derive(Debug)]
#[must_use = "dropping the guard releases the claim"]
pub struct PendingClaim<'a> {
    store: &'a RequestIdStore,
    key: Option<SlotKey>,
}

impl PendingClaim<'_> {
    /// Store `reply` for later duplicates of this request.
    pub fn complete(mut self, reply: StoredReply) {
        if let Some((api_key, request_id)) = self.key.take() {
            self.store.complete(&api_key, &request_id, reply);
        }
    }
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        if let Some((api_key, request_id)) = self.key.take() {
            self.store.release(&api_key, &request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ssokit_auth::Payload;

    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn reply() -> StoredReply {
        StoredReply {
            response_id: 5,
            outcome: CallOutcome::success(Payload::new()),
        }
    }

    #[test]
    fn test_should_return_stored_reply_for_duplicate() {
        let store = RequestIdStore::default();
        assert_eq!(store.claim("k1", "r-1", NOW), Claim::New);
        assert_eq!(store.claim("k1", "r-1", NOW), Claim::InFlight);

        store.complete("k1", "r-1", reply());
        assert_eq!(store.claim("k1", "r-1", NOW + 10), Claim::Duplicate(reply()));
    }

    #[test]
    fn test_should_scope_request_ids_by_api_key() {
        let store = RequestIdStore::default();
        assert_eq!(store.claim("k1", "r-1", NOW), Claim::New);
        assert_eq!(store.claim("k2", "r-1", NOW), Claim::New);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_should_forget_request_ids_after_window() {
        let store = RequestIdStore::new(60);
        assert_eq!(store.claim("k1", "r-1", NOW), Claim::New);
        store.complete("k1", "r-1", reply());

        assert!(matches!(store.claim("k1", "r-1", NOW + 59), Claim::Duplicate(_)));
        assert_eq!(store.claim("k1", "r-1", NOW + 60), Claim::New);
    }

    #[test]
    fn test_should_release_abandoned_claim() {
        let store = RequestIdStore::default();
        let pending = store.claim_pending("k1", "r-1", NOW).unwrap();
        assert_eq!(store.claim("k1", "r-1", NOW), Claim::InFlight);

        drop(pending);
        assert!(store.is_empty());
        assert_eq!(store.claim("k1", "r-1", NOW + 1), Claim::New);
    }

    #[test]
    fn test_should_keep_completed_claim() {
        let store = RequestIdStore::default();
        store.claim_pending("k1", "r-1", NOW).unwrap().complete(reply());

        assert_eq!(store.claim("k1", "r-1", NOW), Claim::Duplicate(reply()));
        assert!(matches!(
            store.claim_pending("k1", "r-1", NOW),
            Err(Claim::Duplicate(_))
        ));
    }

    #[test]
    fn test_should_release_claim_when_handler_panics() {
        let store = RequestIdStore::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _pending = store.claim_pending("k1", "r-1", NOW).unwrap();
            panic!("handler failed");
        }));

        assert!(result.is_err());
        assert_eq!(store.claim("k1", "r-1", NOW), Claim::New);
    }

    #[test]
    fn test_should_sweep_expired_slots_periodically() {
        let store = RequestIdStore::new(60);
        for i in 0..10 {
            assert_eq!(store.claim("k1", &format!("r-{i}"), NOW), Claim::New);
        }
        assert_eq!(store.len(), 10);

        assert_eq!(store.claim("k1", "late", NOW + 30), Claim::New);
        assert_eq!(store.len(), 11);

        assert_eq!(store.claim("k1", "later", NOW + 120), Claim::New);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_should_ignore_completion_of_unknown_request() {
        let store = RequestIdStore::default();
        store.complete("k1", "never-claimed", reply());
        assert!(store.is_empty());
    }

    #[test]
    fn test_should_grant_exactly_one_new_claim_under_contention() {
        let store = Arc::new(RequestIdStore::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.claim("k1", "r-1", NOW))
            })
            .collect();

        let claims: Vec<Claim> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(claims.iter().filter(|c| **c == Claim::New).count(), 1);
        assert!(
            claims
                .iter()
                .all(|c| matches!(c, Claim::New | Claim::InFlight))
        );
    }
}
