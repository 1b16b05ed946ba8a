//! Event records held in the environment's arena.
//!
//! An event is the kernel's only suspension primitive. It is identified by
//! an `EventId` (a key into the arena, never reused) and moves through
//! `Pending → Triggered → Processed` exactly once. Processed slots are
//! eventually dropped from the arena; see `EventRetention`.

use crate::environment::Environment;
use crate::error::SimError;
use crate::process::ProcessId;
use crate::value::Value;

// ── Event ID ──────────────────────────────────────────────────────────

/// Handle to an event owned by an [`Environment`].
///
/// IDs are handed out in creation order, so comparing two IDs tells which
/// event was created first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event ID Generator ───────────────────────────────────────────────

/// Strictly increasing ID generator. One per environment.
#[derive(Debug, Clone, Default)]
pub struct EventIdGen {
    next: u64,
}

impl EventIdGen {
    pub fn new() -> Self {
        EventIdGen { next: 0 }
    }

    /// Mint the next ID.
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    /// Peek at the next ID without consuming it.
    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }
}

// ── Outcome / State ───────────────────────────────────────────────────

/// What an event resolved to. Also the input a process is resumed with.
pub type Outcome = Result<Value, SimError>;

/// Lifecycle of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventState {
    /// No outcome yet.
    Pending,
    /// Outcome decided and the event sits in the queue; callbacks not run yet.
    Triggered(Outcome),
    /// Popped from the queue and all callbacks have run.
    Processed(Outcome),
}

impl EventState {
    pub fn is_pending(&self) -> bool {
        matches!(self, EventState::Pending)
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, EventState::Processed(_))
    }

    /// The outcome, once decided.
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            EventState::Pending => None,
            EventState::Triggered(o) | EventState::Processed(o) => Some(o),
        }
    }
}

// ── Callbacks ─────────────────────────────────────────────────────────

/// Host-supplied continuation. Receives the environment and the id of the
/// event that fired; the outcome is read back through `env.outcome(id)`.
pub type UserCallback = Box<dyn FnOnce(&mut Environment, EventId)>;

/// A continuation attached to an event.
///
/// Kernel continuations are plain data so the arena never holds closures
/// that capture other arena entries.
pub(crate) enum Callback {
    /// Resume a process that is waiting on this event.
    Resume(ProcessId),
    /// Re-evaluate the composite event with this id.
    Condition(EventId),
    /// Deliver this (interruption) event's failure to the process.
    Interrupt(ProcessId),
    User(UserCallback),
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callback::Resume(p) => write!(f, "Resume({})", p),
            Callback::Condition(e) => write!(f, "Condition({})", e),
            Callback::Interrupt(p) => write!(f, "Interrupt({})", p),
            Callback::User(_) => write!(f, "User(..)"),
        }
    }
}

// ── Arena slot ────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct EventSlot {
    pub(crate) state: EventState,
    pub(crate) callbacks: Vec<Callback>,
    /// Never handed to the host; dropped right after it fires.
    pub(crate) internal: bool,
}

impl EventSlot {
    pub(crate) fn pending() -> Self {
        EventSlot {
            state: EventState::Pending,
            callbacks: Vec::new(),
            internal: false,
        }
    }

    pub(crate) fn triggered(outcome: Outcome) -> Self {
        EventSlot {
            state: EventState::Triggered(outcome),
            callbacks: Vec::new(),
            internal: false,
        }
    }

    /// A kernel-only event that wakes `callback` with `outcome`.
    pub(crate) fn internal(outcome: Outcome, callback: Callback) -> Self {
        EventSlot {
            state: EventState::Triggered(outcome),
            callbacks: vec![callback],
            internal: true,
        }
    }
}
