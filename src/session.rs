//! Sessions that completed the `init` handshake with the live worker.
//!
//! A worker instance keeps one simulator per session id in memory. A
//! respawned worker has none, so the registry is cleared on every exit and
//! the next call for each session re-sends `init`.

use std::collections::HashSet;

use crate::protocol::{SessionId, DEFAULT_USER_PROFILE};

/// Set of sessions initialized against the current worker instance.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    initialized: HashSet<SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self, session_id: SessionId) -> bool {
        self.initialized.contains(&session_id)
    }

    /// Returns `false` if the session was already marked.
    pub fn mark_initialized(&mut self, session_id: SessionId) -> bool {
        self.initialized.insert(session_id)
    }

    /// Forget every session (the worker that knew them is gone).
    pub fn clear(&mut self) -> usize {
        let count = self.initialized.len();
        self.initialized.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.initialized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initialized.is_empty()
    }
}

/// Profile to send with `init`: the caller's, or the default record.
pub fn init_profile(profile: Option<&str>) -> String {
    match profile {
        Some(p) if !p.trim().is_empty() => p.to_string(),
        _ => DEFAULT_USER_PROFILE.to_string(),
    }
}
