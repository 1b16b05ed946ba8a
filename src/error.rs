//! Structured error types for the kernel.
//!
//! Every fallible public API returns `SimResult<T>`. The same `SimError`
//! travels inside failed event outcomes, so a process body can match on
//! exactly the condition that ended its wait.

use thiserror::Error;

use crate::event::EventId;
use crate::process::ProcessId;
use crate::resource::ResourceId;
use crate::time::VirtualTime;
use crate::value::Value;

/// Why a process was interrupted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Interrupt {
    /// Explicit `Environment::interrupt` with a caller-chosen cause.
    Cause(Value),

    /// The process lost a unit of a preemptive resource to a stronger request.
    Preempted {
        /// Process that issued the preempting request, if any.
        by: Option<ProcessId>,
        /// When the evicted request had been granted.
        usage_since: VirtualTime,
        resource: ResourceId,
    },
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::Cause(v) => write!(f, "{}", v),
            Interrupt::Preempted {
                by,
                usage_since,
                resource,
            } => {
                write!(f, "preempted on {} (held since {}", resource, usage_since)?;
                match by {
                    Some(p) => write!(f, ", by {})", p),
                    None => write!(f, ")"),
                }
            }
        }
    }
}

/// The top-level error type for the simulation kernel.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum SimError {
    // ── Event errors ──────────────────────────────────────

    /// `succeed`/`fail`/`trigger` on an event that already has an outcome.
    #[error("event {0} has already been triggered")]
    AlreadyTriggered(EventId),

    /// A schedule that would land before the current time, or past the end
    /// of the timeline.
    #[error("invalid delay: cannot schedule at T={requested} when current time is T={current}")]
    InvalidDelay { requested: u64, current: u64 },

    /// Reading the outcome of an event that has not been decided yet.
    #[error("event {0} has not been triggered")]
    NotTriggered(EventId),

    #[error("event {0} is not known to this environment")]
    UnknownEvent(EventId),

    // ── Scheduler errors ──────────────────────────────────

    /// `step` on an empty queue.
    #[error("no scheduled events left")]
    QueueEmpty,

    // ── Process errors ────────────────────────────────────

    #[error("interrupted: {0}")]
    Interrupted(Interrupt),

    /// The process has terminated or is not suspended on any event.
    #[error("process {0} has nothing to interrupt")]
    NothingToInterrupt(ProcessId),

    #[error("process {0} is not known to this environment")]
    UnknownProcess(ProcessId),

    /// A failure raised by process logic itself.
    #[error("{0}")]
    Custom(String),

    // ── Resource errors ───────────────────────────────────

    /// `release` of a request that does not hold a unit.
    #[error("request {0} is not currently granted")]
    NotGranted(EventId),

    /// `cancel` of a request that is not waiting in the queue.
    #[error("request {0} is not queued")]
    NotQueued(EventId),

    /// The request was withdrawn from the queue before being granted.
    #[error("request was cancelled")]
    Cancelled,

    #[error("resource {0} has been closed")]
    ResourceClosed(ResourceId),

    #[error("resource capacity must be positive")]
    InvalidCapacity,

    #[error("resource {0} is not known to this environment")]
    UnknownResource(ResourceId),
}

impl SimError {
    /// Shorthand for a process-level failure with a message.
    pub fn custom(msg: impl Into<String>) -> Self {
        SimError::Custom(msg.into())
    }

    /// The interrupt payload, if this error is an interruption.
    pub fn interrupt(&self) -> Option<&Interrupt> {
        match self {
            SimError::Interrupted(cause) => Some(cause),
            _ => None,
        }
    }

    /// `true` if this is an interruption caused by resource preemption.
    pub fn is_preemption(&self) -> bool {
        matches!(self, SimError::Interrupted(Interrupt::Preempted { .. }))
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_delay() {
        let e = SimError::InvalidDelay {
            requested: 3,
            current: 10,
        };
        assert!(e.to_string().contains("T=3"));
        assert!(e.to_string().contains("T=10"));
    }

    #[test]
    fn test_display_preempted() {
        let e = SimError::Interrupted(Interrupt::Preempted {
            by: Some(ProcessId::new(2)),
            usage_since: VirtualTime::new(4),
            resource: ResourceId::new(0),
        });
        assert_eq!(e.to_string(), "interrupted: preempted on R#0 (held since T=4, by P#2)");
        assert!(e.is_preemption());
    }

    #[test]
    fn test_interrupt_accessor() {
        let e = SimError::Interrupted(Interrupt::Cause(Value::from("stop")));
        assert_eq!(e.interrupt(), Some(&Interrupt::Cause(Value::from("stop"))));
        assert!(!e.is_preemption());
        assert!(SimError::QueueEmpty.interrupt().is_none());
    }

    #[test]
    fn test_error_is_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(SimError::custom("boom"));
        assert_eq!(e.to_string(), "boom");
    }
}
