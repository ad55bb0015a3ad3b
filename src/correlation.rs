//! Correlation table mapping outstanding call ids to their waiting callers.
//!
//! Each entry is a `oneshot::Sender`, so an entry can complete at most once
//! by construction; the table guarantees it completes at least once by
//! draining everything when the worker exits.
//!
//! The table itself is not synchronized. The supervisor keeps it inside the
//! client state mutex, which makes `register`, `resolve`, `fail` and
//! `drain_all_with_error` linearizable with respect to each other.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::{Result, SimulatorError};
use crate::protocol::Response;

/// Fallback text for `{ok: false}` responses without an `error` field.
const DEFAULT_WORKER_ERROR: &str = "Simulator error";

/// Outcome delivered to a waiting caller.
pub type CallOutcome = Result<Response>;

/// Receiving side held by the caller awaiting a response.
pub type PendingReceiver = oneshot::Receiver<CallOutcome>;

/// Outstanding calls by id.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<u64, oneshot::Sender<CallOutcome>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call id and return the receiver its caller awaits.
    ///
    /// # Errors
    ///
    /// `DuplicateCall` if `id` is already pending.
    pub fn register(&mut self, id: u64) -> Result<PendingReceiver> {
        if self.entries.contains_key(&id) {
            return Err(SimulatorError::DuplicateCall(id));
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, tx);
        Ok(rx)
    }

    /// Complete the entry for `response.id`.
    ///
    /// `ok: false` responses complete the caller with `Worker(error)`.
    /// Returns `false` when no entry matched (late or duplicate response).
    pub fn resolve(&mut self, response: Response) -> bool {
        let Some(tx) = self.entries.remove(&response.id) else {
            tracing::debug!(id = response.id, "Discarding response for unknown call");
            return false;
        };

        let outcome = if response.ok {
            Ok(response)
        } else {
            let message = response
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_WORKER_ERROR.to_string());
            Err(SimulatorError::Worker(message))
        };

        // The caller may have stopped waiting; nothing else to do then.
        let _ = tx.send(outcome);
        true
    }

    /// Complete the entry for `id` with `error`.
    pub fn fail(&mut self, id: u64, error: SimulatorError) -> bool {
        match self.entries.remove(&id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without completing it.
    ///
    /// Used when the caller itself gave up waiting.
    pub fn remove(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Fail every pending entry and empty the table.
    ///
    /// Returns the number of entries failed.
    pub fn drain_all_with_error<F>(&mut self, make_error: F) -> usize
    where
        F: Fn() -> SimulatorError,
    {
        let count = self.entries.len();
        for (_, tx) in self.entries.drain() {
            let _ = tx.send(Err(make_error()));
        }
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
