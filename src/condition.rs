//! Composite events over a set of constituents.
//!
//! A composite has no queue slot of its own until it resolves. It hangs a
//! `Callback::Condition` on every constituent and re-evaluates each time
//! one of them is processed.

use tracing::{debug, trace};

use crate::environment::Environment;
use crate::error::{SimError, SimResult};
use crate::event::{Callback, EventId, Outcome};
use crate::scheduler::EventPriority;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConditionKind {
    /// Succeeds when every constituent succeeded; fails on the first failure.
    All,
    /// Succeeds on the first success; fails once every constituent failed.
    Any,
}

#[derive(Debug)]
pub(crate) struct ConditionState {
    kind: ConditionKind,
    events: Vec<EventId>,
    /// Per position: whether that constituent has been counted.
    seen: Vec<bool>,
    /// Success values, cached so retired constituents still contribute.
    values: Vec<Option<Value>>,
    succeeded: usize,
    failed: usize,
    first_failure: Option<SimError>,
}

impl ConditionState {
    fn new(kind: ConditionKind, events: &[EventId]) -> Self {
        ConditionState {
            kind,
            events: events.to_vec(),
            seen: vec![false; events.len()],
            values: vec![None; events.len()],
            succeeded: 0,
            failed: 0,
            first_failure: None,
        }
    }

    /// Count one firing of `event`. Returns `Some(ok)` once resolved.
    fn observe(&mut self, event: EventId, outcome: Outcome) -> Option<bool> {
        let pos = (0..self.events.len()).find(|&i| self.events[i] == event && !self.seen[i])?;
        self.seen[pos] = true;
        match outcome {
            Ok(v) => {
                self.succeeded += 1;
                self.values[pos] = Some(v);
            }
            Err(e) => {
                self.failed += 1;
                self.first_failure.get_or_insert(e);
            }
        }

        let total = self.events.len();
        match self.kind {
            ConditionKind::All if self.failed > 0 => Some(false),
            ConditionKind::All if self.succeeded == total => Some(true),
            ConditionKind::Any if self.succeeded > 0 => Some(true),
            ConditionKind::Any if self.failed == total => Some(false),
            _ => None,
        }
    }

    fn into_outcome(self, ok: bool) -> Outcome {
        if !ok {
            return Err(self.first_failure.unwrap_or(SimError::Cancelled));
        }
        let entries = self
            .events
            .into_iter()
            .zip(self.values)
            .filter_map(|(e, v)| v.map(|v| (e, v)))
            .collect();
        Ok(Value::Conditions(entries))
    }
}

impl Environment {
    /// Event that succeeds once every constituent has succeeded.
    ///
    /// Fails as soon as any constituent fails, with that constituent's error.
    /// The success value is `Value::Conditions` with every constituent value.
    pub fn all_of(&mut self, events: &[EventId]) -> SimResult<EventId> {
        self.condition(ConditionKind::All, events)
    }

    /// Event that succeeds as soon as one constituent succeeds.
    ///
    /// Fails only once every constituent has failed, with the first error.
    pub fn any_of(&mut self, events: &[EventId]) -> SimResult<EventId> {
        self.condition(ConditionKind::Any, events)
    }

    fn condition(&mut self, kind: ConditionKind, events: &[EventId]) -> SimResult<EventId> {
        for &event in events {
            self.slot(event)?;
        }

        let composite = self.event();
        if events.is_empty() {
            self.settle(composite, Ok(Value::Conditions(Vec::new())), EventPriority::Normal)?;
            return Ok(composite);
        }

        self.conditions
            .insert(composite, ConditionState::new(kind, events));

        for &event in events {
            if !self.conditions.contains_key(&composite) {
                break;
            }
            if self.is_processed(event) {
                self.check_condition(composite, event);
            } else {
                self.attach(event, Callback::Condition(composite))?;
            }
        }
        Ok(composite)
    }

    /// Continuation: constituent `event` of `composite` was processed.
    pub(crate) fn check_condition(&mut self, composite: EventId, event: EventId) {
        let Some(outcome) = self.processed_outcome(event) else {
            return;
        };
        let Some(state) = self.conditions.get_mut(&composite) else {
            return;
        };
        let Some(ok) = state.observe(event, outcome) else {
            return;
        };
        let Some(state) = self.conditions.remove(&composite) else {
            return;
        };

        trace!(%composite, kind = ?state.kind, ok, "condition resolved");
        let outcome = state.into_outcome(ok);
        if let Err(e) = self.settle(composite, outcome, EventPriority::Normal) {
            debug!(%composite, error = %e, "composite already decided by the host");
        }
    }
}
