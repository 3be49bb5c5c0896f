//! Front-end registry of open sessions.
//!
//! Maps session handles to short sequential IDs that a user can type.
//! IDs start at 1, grow monotonically and are never reused, so a stale ID
//! fails lookup instead of reaching a newer session.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::session::SessionHandle;

#[derive(Debug)]
struct Entries {
    by_id: BTreeMap<u64, SessionHandle>,
    next_id: u64,
}

/// Sequential-ID registry plus the "stop the driver loop" flag.
#[derive(Debug)]
pub struct SessionRegistry {
    entries: Mutex<Entries>,
    close_requested: AtomicBool,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(next_id: u64) -> Self {
        Self {
            entries: Mutex::new(Entries {
                by_id: BTreeMap::new(),
                next_id,
            }),
            close_requested: AtomicBool::new(false),
        }
    }

    /// Register a handle and return its new ID.
    pub fn open(&self, handle: SessionHandle) -> u64 {
        let mut entries = self.entries.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.by_id.insert(id, handle);
        debug!(id, session = %handle, "session registered");
        id
    }

    /// Remove an ID. Returns whether it was registered.
    pub fn close(&self, id: u64) -> bool {
        let removed = self.entries.lock().by_id.remove(&id);
        if let Some(handle) = removed {
            debug!(id, session = %handle, "session unregistered");
        }
        removed.is_some()
    }

    pub fn lookup(&self, id: u64) -> Option<SessionHandle> {
        self.entries.lock().by_id.get(&id).copied()
    }

    /// All registered sessions as `(handle, id)`, ordered by ID.
    pub fn list_all(&self) -> Vec<(SessionHandle, u64)> {
        self.entries
            .lock()
            .by_id
            .iter()
            .map(|(id, handle)| (*handle, *id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_id.len()
    }

    /// Ask the driver loop to stop after the current line.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }
}
