//! Per-identity mutation ledger.
//!
//! Entries are kept in issue order. The displayed value is a left fold over
//! them starting from `settled`, the last value known to be on the server:
//!
//! | state           | effect on the fold            |
//! |-----------------|-------------------------------|
//! | `Applying`      | replaced by the optimistic value |
//! | `Confirmed(c)`  | replaced by the canonical `c` |
//! | `RolledBack`    | skipped                       |
//!
//! So a failure reverts to whatever the earlier entries produced, and a late
//! confirmation of an old write never overrides a newer entry.

use rtgrefit_protocol::{ImageRef, Record};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EntryState {
    Applying,
    Confirmed(Option<Record>),
    RolledBack,
}

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    optimistic: Option<Record>,
    state: EntryState,
}

#[derive(Debug, Clone)]
pub(crate) struct Ledger {
    /// Store epoch the ledger belongs to.
    pub epoch: u64,
    settled: Option<Record>,
    entries: VecDeque<Entry>,
}

impl Ledger {
    pub fn new(epoch: u64, settled: Option<Record>) -> Self {
        Self {
            epoch,
            settled,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, version: u64, optimistic: Option<Record>) {
        self.entries.push_back(Entry {
            version,
            optimistic,
            state: EntryState::Applying,
        });
    }

    pub fn display(&self) -> Option<Record> {
        self.entries
            .iter()
            .fold(self.settled.as_ref(), |acc, entry| match &entry.state {
                EntryState::Applying => entry.optimistic.as_ref(),
                EntryState::Confirmed(canonical) => canonical.as_ref(),
                EntryState::RolledBack => acc,
            })
            .cloned()
    }

    /// Returns false if the version is unknown (already compacted away).
    pub fn resolve(&mut self, version: u64, state: EntryState) -> bool {
        match self.entries.iter_mut().find(|e| e.version == version) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    pub fn has_later(&self, version: u64) -> bool {
        self.entries.iter().any(|e| e.version > version)
    }

    /// Fold resolved entries at the front into `settled`.
    pub fn compact(&mut self) {
        while let Some(front) = self.entries.front() {
            if front.state == EntryState::Applying {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                if let EntryState::Confirmed(canonical) = entry.state {
                    self.settled = canonical;
                }
            }
        }
    }

    /// A snapshot showed the server value. Resolved entries are assumed to be
    /// reflected in it; pending ones still apply on top.
    pub fn rebase(&mut self, server: Option<Record>) {
        self.settled = server;
        self.entries.retain(|e| e.state == EntryState::Applying);
    }

    pub fn is_settled(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn optimistic(&self, version: u64) -> Option<&Record> {
        self.entries
            .iter()
            .find(|e| e.version == version)
            .and_then(|e| e.optimistic.as_ref())
    }

    /// Replace a preview with its durable URL (or drop it) in every pending
    /// value. Returns whether anything changed.
    pub fn swap_image(&mut self, from: &ImageRef, to: Option<&ImageRef>) -> bool {
        let mut changed = false;
        for entry in self.entries.iter_mut() {
            if let Some(record) = entry.optimistic.as_mut() {
                changed |= record.swap_image(from, to);
            }
        }
        changed
    }
}
