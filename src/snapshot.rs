//! Read-only view of an environment for observers.
//!
//! A snapshot is plain data copied out of the environment, so it can be
//! kept, compared or exported while the simulation keeps running.

use crate::environment::Environment;
use crate::event::EventId;
use crate::process::ProcessId;
use crate::resource::{ResourceId, ResourceKind};
use crate::time::VirtualTime;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub capacity: usize,
    pub usage: usize,
    pub queue_len: usize,
    pub closed: bool,
    /// Requests the resource still tracks: queued plus granted.
    pub tracked_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    pub name: Option<String>,
    /// Event the process is suspended on.
    pub waiting_on: Option<EventId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvironmentSnapshot {
    pub now: VirtualTime,
    pub events_processed: u64,
    /// Queue entries waiting to fire.
    pub pending: usize,
    pub live_processes: usize,
    /// Live processes in spawn order.
    pub processes: Vec<ProcessSnapshot>,
    pub resources: Vec<ResourceSnapshot>,
}

impl EnvironmentSnapshot {
    /// Pretty-printed JSON.
    #[cfg(feature = "serialize")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Environment {
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        let processes = self
            .processes
            .iter()
            .map(|(&id, slot)| ProcessSnapshot {
                id,
                name: slot.name().map(str::to_string),
                waiting_on: slot.target(),
            })
            .collect();

        let resources = self
            .resources
            .iter()
            .map(|r| ResourceSnapshot {
                id: r.id(),
                kind: r.kind(),
                capacity: r.capacity(),
                usage: r.usage(),
                queue_len: r.queue_len(),
                closed: r.is_closed(),
                tracked_requests: r.tracked_requests(),
            })
            .collect();

        EnvironmentSnapshot {
            now: self.now(),
            events_processed: self.events_processed(),
            pending: self.pending_count(),
            live_processes: self.live_processes(),
            processes,
            resources,
        }
    }
}
