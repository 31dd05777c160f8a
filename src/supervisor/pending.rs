// src/supervisor/pending.rs

//! Table of commands awaiting an outcome.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::protocol::Command;
use crate::types::RequestId;

use super::Continuation;

/// Record of one outstanding command.
pub struct PendingEntry {
    pub command: Command,
    pub continuation: Continuation,
    pub started: Instant,
}

impl PendingEntry {
    pub fn new(command: Command, continuation: Continuation) -> Self {
        Self {
            command,
            continuation,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.command.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Outstanding commands keyed by request id.
///
/// Every entry is removed exactly once: by `remove` when its result
/// arrives, or by `drain` when the worker exits.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<RequestId, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Returns it back if its id is already pending.
    pub fn insert(&mut self, entry: PendingEntry) -> Result<(), PendingEntry> {
        if self.entries.contains_key(&entry.id()) {
            return Err(entry);
        }
        self.entries.insert(entry.id(), entry);
        Ok(())
    }

    pub fn remove(&mut self, id: RequestId) -> Option<PendingEntry> {
        self.entries.remove(&id)
    }

    /// Remove every entry, oldest request first.
    pub fn drain(&mut self) -> Vec<PendingEntry> {
        let mut entries: Vec<_> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(PendingEntry::id);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("PendingTable").field("ids", &ids).finish()
    }
}
