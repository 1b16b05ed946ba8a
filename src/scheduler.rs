//! Deterministic time-ordered queue.
//!
//! Uses a `BinaryHeap` with reversed `Ord` to act as a min-heap keyed by
//! `(time, priority, sequence)`. The sequence number is a per-queue
//! insertion counter, so entries with equal time and priority pop in the
//! order they were pushed and two runs with identical schedules pop
//! identically.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::event::{Callback, EventId};
use crate::time::VirtualTime;

// ── Priority tier ─────────────────────────────────────────────────────

/// Tie-break tier for entries scheduled at the same time.
///
/// `Urgent` pops before `Normal`. The kernel uses `Urgent` for process
/// start-up and interrupt delivery so those happen before ordinary events
/// due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EventPriority {
    Urgent,
    #[default]
    Normal,
}

// ── Queue key ─────────────────────────────────────────────────────────

/// Total order over queue entries.
///
/// Field order matters: the derived `Ord` compares time first, then the
/// priority tier, then the insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueKey {
    pub time: VirtualTime,
    pub priority: EventPriority,
    pub sequence: u64,
}

// ── Entries ───────────────────────────────────────────────────────────

/// What to do when an entry reaches the front of the queue.
#[derive(Debug)]
pub(crate) enum Action {
    /// Process the event: settle its outcome and run its callbacks.
    Fire(EventId),
    /// Run one callback for an event that was already processed when the
    /// callback was registered.
    Deferred(EventId, Callback),
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) key: QueueKey,
    pub(crate) action: Action,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

/// Reversed so that `BinaryHeap` pops the *smallest* key first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────

/// The environment's event queue.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    queue: BinaryHeap<Entry>,
    next_sequence: u64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Scheduler {
            queue: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    /// Insert an entry. Returns the key it was filed under.
    pub(crate) fn push(
        &mut self,
        time: VirtualTime,
        priority: EventPriority,
        action: Action,
    ) -> QueueKey {
        let key = QueueKey {
            time,
            priority,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.queue.push(Entry { key, action });
        key
    }

    /// Pop the earliest entry.
    pub(crate) fn pop(&mut self) -> Option<Entry> {
        self.queue.pop()
    }

    /// Key of the earliest entry without removing it.
    pub(crate) fn peek_key(&self) -> Option<QueueKey> {
        self.queue.peek().map(|e| e.key)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
