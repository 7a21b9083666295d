//! Correlation table for in-flight calls.
//!
//! Each outbound request registers its correlation id here together with a
//! oneshot delivery slot. The read loop completes the slot when the matching
//! response arrives; `cancel_all` drains everything on close. An entry is
//! resolved at most once — completing or removing it takes it out of the
//! table, so a late response for the same id finds nothing and is discarded
//! upstream.
//!
//! [`register`](PendingCalls::register) hands back a [`PendingCall`] guard
//! that removes its entry on drop. That covers the timeout arm and also
//! callers whose future is dropped mid-flight (e.g. losing a `select!`), so
//! cancellation can never leak an entry.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::envelope::Response;

/// Table of pending calls keyed by correlation id.
///
/// Safe for concurrent use from the read loop and any number of caller
/// tasks. The lock is never held across delivery: `oneshot::Sender::send`
/// never blocks, and receivers are awaited outside the table entirely.
#[derive(Default)]
pub(crate) struct PendingCalls {
    inner: Mutex<HashMap<String, oneshot::Sender<Response>>>,
}

/// A registered call's receive side. Dropping it deregisters the entry,
/// after which a matching response is an orphan.
pub(crate) struct PendingCall<'a> {
    table: &'a PendingCalls,
    id: String,
    pub(crate) rx: oneshot::Receiver<Response>,
}

impl PendingCall<'_> {
    #[cfg(test)]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        // No-op if the entry was already completed or cancelled.
        self.table.remove(&self.id);
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh call. The guard's receiver resolves with the
    /// matching response, or errors when the entry is cancelled.
    pub fn register(&self, id: String) -> PendingCall<'_> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(id.clone(), tx);
        PendingCall {
            table: self,
            id,
            rx,
        }
    }

    /// Deliver a response to its pending call.
    ///
    /// Returns `true` if an entry existed and was completed, `false` for an
    /// unknown or already-resolved id (no other effect).
    pub fn complete(&self, id: &str, response: Response) -> bool {
        let slot = self.inner.lock().unwrap().remove(id);
        match slot {
            // send fails only if the caller already gave up; either way the
            // entry is gone and the response counted as delivered.
            Some(tx) => {
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without delivering.
    pub fn remove(&self, id: &str) {
        self.inner.lock().unwrap().remove(id);
    }

    /// Drain every entry; dropping the senders resolves each receiver with a
    /// closed error, which callers surface as connection-closed.
    pub fn cancel_all(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Number of calls currently awaiting a response.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
