//! Request coalescing
//!
//! Concurrent requests for the same not-yet-cached key collapse into a
//! single origin fetch. The first caller becomes the leader and runs the
//! fetch; every other caller attaches to the pending slot and receives a
//! clone of the leader's outcome. The slot is removed the instant the
//! fetch settles — success, failure, or leader cancellation — so a failed
//! fetch can never strand an entry.

use crate::error::{EdgeError, Result};
use crate::models::CachedResponse;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

type Outcome = Result<CachedResponse>;

/// Deduplicates concurrent fetches per cache key
#[derive(Default)]
pub struct RequestCoalescer {
    pending: Mutex<HashMap<String, broadcast::Sender<Outcome>>>,
}

/// Removes the pending slot even if the leader's future is dropped
/// mid-fetch (client disconnect aborts the request task)
struct PendingGuard<'a> {
    coalescer: &'a RequestCoalescer,
    key: String,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    /// Remove the slot and hand back the sender for the final broadcast
    fn finish(mut self) -> Option<broadcast::Sender<Outcome>> {
        self.armed = false;
        self.coalescer.pending.lock().unwrap().remove(&self.key)
    }
}

impl<'a> Drop for PendingGuard<'a> {
    fn drop(&mut self) {
        if self.armed {
            self.coalescer.pending.lock().unwrap().remove(&self.key);
        }
    }
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key`, or attach to the fetch already in flight
    ///
    /// Returns the outcome plus whether this caller was coalesced onto
    /// another caller's fetch (surfaced as `X-CDN-Coalesced`).
    ///
    /// Invariant: at most one pending slot exists per key at any time; the
    /// map is only touched in non-suspending sections.
    pub async fn coalesce<F, Fut>(&self, key: &str, fetch: F) -> (Outcome, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let existing_rx = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get(key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    pending.insert(key.to_string(), tx);
                    None
                }
            }
        };

        if let Some(mut rx) = existing_rx {
            debug!("coalescing onto in-flight fetch: {}", key);
            let outcome = match rx.recv().await {
                Ok(outcome) => outcome,
                // Leader dropped without broadcasting (cancelled task)
                Err(_) => Err(EdgeError::Internal(
                    "coalesced fetch was abandoned".to_string(),
                )),
            };
            return (outcome, true);
        }

        let guard = PendingGuard {
            coalescer: self,
            key: key.to_string(),
            armed: true,
        };

        let outcome = fetch().await;

        // Unregister before broadcasting: a caller arriving now starts a
        // fresh fetch instead of attaching to a settled one.
        if let Some(tx) = guard.finish() {
            let _ = tx.send(outcome.clone());
        }

        (outcome, false)
    }

    /// Number of fetches currently in flight
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
