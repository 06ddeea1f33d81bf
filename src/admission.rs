//! Bounded-concurrency admission control for origin fetches
//!
//! At most K fetches run against the primary origin at once. Requests
//! over the bound wait in a strict FIFO queue; a waiter is shed with
//! `RateLimited` either when its own wait exceeds the enqueue timeout or
//! when, at dequeue time, it has already sat in the queue longer than the
//! staleness bound. The two thresholds are intentionally independent —
//! see DESIGN.md.
//!
//! A plain semaphore cannot express the staleness check, so the queue is
//! explicit: grants travel over per-slot oneshot channels, and the grant
//! plus the active-count increment happen under one mutex acquisition so
//! `active <= K` holds at every instant.

use crate::error::{EdgeError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One request waiting for an admission slot
struct QueueSlot {
    enqueued_at: Instant,
    grant: oneshot::Sender<()>,
}

struct AdmissionState {
    active: usize,
    queue: VecDeque<QueueSlot>,
}

/// Gate in front of the origin store client
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
    max_concurrent: usize,
    queue_timeout: Duration,
    queue_staleness: Duration,
}

/// Proof of admission; dropping it releases the slot and wakes the queue
///
/// The explicit-release contract is expressed as RAII so an early return
/// or panic inside an admitted fetch cannot leak its slot.
pub struct AdmissionTicket {
    controller: Arc<AdmissionController>,
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.controller.release();
    }
}

impl fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionTicket").finish_non_exhaustive()
    }
}

impl AdmissionController {
    pub fn new(max_concurrent: usize, queue_timeout: Duration, queue_staleness: Duration) -> Self {
        AdmissionController {
            state: Mutex::new(AdmissionState {
                active: 0,
                queue: VecDeque::new(),
            }),
            max_concurrent,
            queue_timeout,
            queue_staleness,
        }
    }

    /// Acquire an admission slot, waiting in FIFO order if at capacity
    ///
    /// # Returns
    /// * `Ok(AdmissionTicket)` once admitted
    /// * `Err(EdgeError::RateLimited)` if the wait times out or the slot
    ///   is shed as stale at dequeue time
    pub async fn admit(self: &Arc<Self>) -> Result<AdmissionTicket> {
        let mut rx = {
            let mut state = self.state.lock().unwrap();
            if state.active < self.max_concurrent {
                state.active += 1;
                return Ok(AdmissionTicket {
                    controller: Arc::clone(self),
                });
            }

            let (tx, rx) = oneshot::channel();
            state.queue.push_back(QueueSlot {
                enqueued_at: Instant::now(),
                grant: tx,
            });
            debug!(
                "admission queue: depth now {} (active {})",
                state.queue.len(),
                state.active
            );
            rx
        };

        match tokio::time::timeout(self.queue_timeout, &mut rx).await {
            // Granted; release() already incremented the active count
            Ok(Ok(())) => Ok(AdmissionTicket {
                controller: Arc::clone(self),
            }),
            // Sender dropped: shed as stale at dequeue time
            Ok(Err(_)) => Err(self.rate_limited()),
            // Waited past the enqueue timeout; the dead slot is skipped
            // by release() when it reaches the queue head
            Err(_) => {
                // A grant can land between the timeout firing and this
                // arm running. Close the channel so release() can no
                // longer hand us a slot, then return any grant that
                // already got through so its capacity is not lost.
                rx.close();
                if rx.try_recv().is_ok() {
                    self.release();
                }
                warn!("admission wait timed out after {:?}", self.queue_timeout);
                Err(self.rate_limited())
            }
        }
    }

    fn rate_limited(&self) -> EdgeError {
        EdgeError::RateLimited {
            retry_after_secs: self.queue_timeout.as_secs().max(1),
        }
    }

    /// Free a slot and hand it to the first live, non-stale waiter
    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = state.active.saturating_sub(1);

        while let Some(slot) = state.queue.pop_front() {
            if slot.enqueued_at.elapsed() > self.queue_staleness {
                // Dropping the grant sender rejects the waiter with
                // RateLimited; keep scanning for a fresher slot.
                warn!("shedding stale admission slot");
                continue;
            }

            state.active += 1;
            match slot.grant.send(()) {
                Ok(()) => break,
                Err(_) => {
                    // Waiter already gave up (its own timeout fired)
                    state.active -= 1;
                    continue;
                }
            }
        }
    }

    /// Current number of admitted origin fetches
    pub fn active_fetches(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// Current number of queued requests
    pub fn queue_depth(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}
