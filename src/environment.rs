//! The scheduling authority.
//!
//! `Environment` owns the clock, the event arena, the queue, and every
//! process and resource record. Everything else holds plain ids into it.
//! The loop is synchronous and single-threaded: `step` pops one entry,
//! moves the clock, and runs the entry's continuations before returning.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace};

use crate::condition::ConditionState;
use crate::config::{EnvironmentBuilder, EnvironmentConfig, EventRetention};
use crate::error::{SimError, SimResult};
use crate::event::{Callback, EventId, EventIdGen, EventSlot, EventState, Outcome};
use crate::eventlog::EventLog;
use crate::process::{ProcessHandle, ProcessId, ProcessSlot};
use crate::random::RandomSource;
use crate::resource::ResourceState;
use crate::scheduler::{Action, Entry, EventPriority, QueueKey, Scheduler};
use crate::time::VirtualTime;
use crate::value::Value;

// ── Stop condition ────────────────────────────────────────────────────

/// When `Environment::run` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    /// Drain the queue.
    Forever,
    /// Fire every entry due at or before this time, then set the clock to it.
    Time(VirtualTime),
    /// Stop as soon as this event has been processed.
    Event(EventId),
}

impl From<VirtualTime> for Until {
    fn from(t: VirtualTime) -> Self {
        Until::Time(t)
    }
}

impl From<EventId> for Until {
    fn from(e: EventId) -> Self {
        Until::Event(e)
    }
}

impl From<ProcessHandle> for Until {
    fn from(p: ProcessHandle) -> Self {
        Until::Event(p.completion)
    }
}

// ── Environment ───────────────────────────────────────────────────────

/// A single simulation run.
///
/// Independent environments share nothing, so several reproducible runs
/// can live in one host process.
pub struct Environment {
    now: VirtualTime,
    scheduler: Scheduler,
    ids: EventIdGen,
    events: BTreeMap<EventId, EventSlot>,
    /// Processed events still held for inspection, oldest first.
    retained: VecDeque<EventId>,
    retention: EventRetention,
    /// Live processes only; a slot is dropped when its process terminates.
    pub(crate) processes: BTreeMap<ProcessId, ProcessSlot>,
    pub(crate) next_process: u64,
    pub(crate) conditions: BTreeMap<EventId, ConditionState>,
    pub(crate) resources: Vec<ResourceState>,
    /// Process whose body is currently executing.
    pub(crate) active: Option<ProcessId>,
    rng: Box<dyn RandomSource>,
    log: Option<EventLog>,
    events_processed: u64,
}

impl Environment {
    /// Environment at time zero with the default random source and no log.
    pub fn new() -> Self {
        EnvironmentBuilder::new().build()
    }

    /// Start a fluent builder.
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new()
    }

    pub(crate) fn from_parts(config: &EnvironmentConfig, rng: Box<dyn RandomSource>) -> Self {
        Environment {
            now: config.start_time,
            scheduler: Scheduler::new(),
            ids: EventIdGen::new(),
            events: BTreeMap::new(),
            retained: VecDeque::new(),
            retention: config.retention,
            processes: BTreeMap::new(),
            next_process: 0,
            conditions: BTreeMap::new(),
            resources: Vec::new(),
            active: None,
            rng,
            log: config.logging.event_log(),
            events_processed: 0,
        }
    }

    // ── Inspection ────────────────────────────────────────────────

    /// Current simulated time.
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Events fired so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Entries waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Time of the next queue entry, if any.
    pub fn peek(&self) -> Option<VirtualTime> {
        self.scheduler.peek_key().map(|k| k.time)
    }

    /// `true` when nothing is left to fire.
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_empty()
    }

    /// The injected random source, for process logic.
    pub fn rng(&mut self) -> &mut dyn RandomSource {
        self.rng.as_mut()
    }

    /// Events currently held in the arena, in any state.
    pub fn tracked_events(&self) -> usize {
        self.events.len()
    }

    /// The firing log, if logging was enabled at construction.
    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    // ── Events ────────────────────────────────────────────────────

    /// Create a bare pending event.
    pub fn event(&mut self) -> EventId {
        self.alloc(EventSlot::pending())
    }

    /// Create an event that succeeds with `value` after `delay` ticks.
    pub fn timeout(&mut self, delay: u64, value: Value) -> SimResult<EventId> {
        let at = self.delay_to_time(delay)?;
        let event = self.alloc(EventSlot::triggered(Ok(value)));
        self.scheduler
            .push(at, EventPriority::Normal, Action::Fire(event));
        Ok(event)
    }

    /// Queue `event` for firing `delay` ticks from now.
    ///
    /// A pending event fired this way succeeds with `Value::None`.
    pub fn schedule(
        &mut self,
        event: EventId,
        delay: u64,
        priority: EventPriority,
    ) -> SimResult<QueueKey> {
        let at = self.delay_to_time(delay)?;
        self.schedule_at(event, at, priority)
    }

    /// Queue `event` for firing at absolute time `at`.
    pub fn schedule_at(
        &mut self,
        event: EventId,
        at: VirtualTime,
        priority: EventPriority,
    ) -> SimResult<QueueKey> {
        if at < self.now {
            return Err(SimError::InvalidDelay {
                requested: at.ticks(),
                current: self.now.ticks(),
            });
        }
        if self.slot(event)?.state.is_processed() {
            return Err(SimError::AlreadyTriggered(event));
        }
        Ok(self.scheduler.push(at, priority, Action::Fire(event)))
    }

    /// Resolve a pending event successfully; it fires at the current time.
    pub fn succeed(&mut self, event: EventId, value: Value) -> SimResult<()> {
        self.settle(event, Ok(value), EventPriority::Normal)
    }

    /// Resolve a pending event as failed; it fires at the current time.
    pub fn fail(&mut self, event: EventId, error: SimError) -> SimResult<()> {
        self.settle(event, Err(error), EventPriority::Normal)
    }

    /// Copy the decided outcome of `source` onto the pending `event`.
    pub fn trigger(&mut self, event: EventId, source: EventId) -> SimResult<()> {
        let outcome = self
            .slot(source)?
            .state
            .outcome()
            .cloned()
            .ok_or(SimError::NotTriggered(source))?;
        self.settle(event, outcome, EventPriority::Normal)
    }

    /// Register a continuation on `event`.
    ///
    /// Continuations run in registration order when the event fires. If the
    /// event was already processed, the continuation gets its own queue
    /// entry at the current time instead of running inline.
    pub fn add_callback<F>(&mut self, event: EventId, f: F) -> SimResult<()>
    where
        F: FnOnce(&mut Environment, EventId) + 'static,
    {
        self.attach(event, Callback::User(Box::new(f)))
    }

    pub fn state(&self, event: EventId) -> SimResult<&EventState> {
        self.slot(event).map(|s| &s.state)
    }

    /// The decided outcome, once the event has been triggered.
    ///
    /// `None` as well once a processed event has aged out of the
    /// retention window.
    pub fn outcome(&self, event: EventId) -> Option<&Outcome> {
        self.events.get(&event)?.state.outcome()
    }

    /// The success value, if the event succeeded.
    pub fn value(&self, event: EventId) -> Option<&Value> {
        self.outcome(event)?.as_ref().ok()
    }

    pub fn is_triggered(&self, event: EventId) -> bool {
        self.outcome(event).is_some()
    }

    pub fn is_processed(&self, event: EventId) -> bool {
        self.events
            .get(&event)
            .map_or(false, |s| s.state.is_processed())
    }

    // ── Run loop ──────────────────────────────────────────────────

    /// Pop and execute exactly one queue entry.
    ///
    /// Returns the id of the event the entry belonged to.
    pub fn step(&mut self) -> SimResult<EventId> {
        let Entry { key, action } = self.scheduler.pop().ok_or(SimError::QueueEmpty)?;

        debug_assert!(
            key.time >= self.now,
            "time went backward: now={}, entry={}",
            self.now,
            key.time
        );
        self.now = key.time;

        match action {
            Action::Fire(event) => {
                self.fire(event);
                Ok(event)
            }
            Action::Deferred(event, callback) => {
                trace!(%event, ?callback, time = %self.now, "deferred callback");
                self.dispatch(event, callback);
                Ok(event)
            }
        }
    }

    /// Step until the queue drains or `until` is reached.
    ///
    /// Returns the number of events fired during this call.
    pub fn run(&mut self, until: impl Into<Until>) -> SimResult<u64> {
        let start = self.events_processed;

        match until.into() {
            Until::Forever => {
                while !self.scheduler.is_empty() {
                    self.step()?;
                }
            }
            Until::Time(limit) => {
                if limit < self.now {
                    return Err(SimError::InvalidDelay {
                        requested: limit.ticks(),
                        current: self.now.ticks(),
                    });
                }
                while let Some(key) = self.scheduler.peek_key() {
                    if key.time > limit {
                        break;
                    }
                    self.step()?;
                }
                self.now = limit;
            }
            Until::Event(target) => {
                self.slot(target)?;
                while !self.is_processed(target) {
                    if self.scheduler.is_empty() {
                        debug!(%target, "queue drained before target event fired");
                        break;
                    }
                    self.step()?;
                }
            }
        }

        let fired = self.events_processed - start;
        debug!(fired, now = %self.now, pending = self.scheduler.len(), "run finished");
        Ok(fired)
    }

    // ── Internals ─────────────────────────────────────────────────

    pub(crate) fn alloc(&mut self, slot: EventSlot) -> EventId {
        let id = self.ids.next_id();
        self.events.insert(id, slot);
        id
    }

    pub(crate) fn push_entry(
        &mut self,
        time: VirtualTime,
        priority: EventPriority,
        action: Action,
    ) -> QueueKey {
        self.scheduler.push(time, priority, action)
    }

    pub(crate) fn slot(&self, event: EventId) -> SimResult<&EventSlot> {
        self.events
            .get(&event)
            .ok_or(SimError::UnknownEvent(event))
    }

    fn delay_to_time(&self, delay: u64) -> SimResult<VirtualTime> {
        self.now.plus(delay).ok_or(SimError::InvalidDelay {
            requested: self.now.ticks().saturating_add(delay),
            current: self.now.ticks(),
        })
    }

    /// Decide a pending event's outcome and queue it at the current time.
    pub(crate) fn settle(
        &mut self,
        event: EventId,
        outcome: Outcome,
        priority: EventPriority,
    ) -> SimResult<()> {
        let slot = self
            .events
            .get_mut(&event)
            .ok_or(SimError::UnknownEvent(event))?;
        if !slot.state.is_pending() {
            return Err(SimError::AlreadyTriggered(event));
        }
        slot.state = EventState::Triggered(outcome);
        self.scheduler.push(self.now, priority, Action::Fire(event));
        Ok(())
    }

    /// Replace the outcome of an event that is triggered but not yet
    /// processed. Returns `false` if the event is pending, processed or gone.
    pub(crate) fn redecide(&mut self, event: EventId, outcome: Outcome) -> bool {
        match self.events.get_mut(&event) {
            Some(slot) if matches!(slot.state, EventState::Triggered(_)) => {
                slot.state = EventState::Triggered(outcome);
                true
            }
            _ => false,
        }
    }

    /// Register a kernel or user continuation on `event`.
    pub(crate) fn attach(&mut self, event: EventId, callback: Callback) -> SimResult<()> {
        let slot = self
            .events
            .get_mut(&event)
            .ok_or(SimError::UnknownEvent(event))?;
        if slot.state.is_processed() {
            self.scheduler.push(
                self.now,
                EventPriority::Normal,
                Action::Deferred(event, callback),
            );
        } else {
            slot.callbacks.push(callback);
        }
        Ok(())
    }

    /// Remove the resume continuation of `pid` from `event`.
    pub(crate) fn detach_resume(&mut self, event: EventId, pid: ProcessId) {
        if let Some(slot) = self.events.get_mut(&event) {
            slot.callbacks
                .retain(|cb| !matches!(cb, Callback::Resume(p) if *p == pid));
        }
    }

    /// Clone of a processed event's outcome.
    pub(crate) fn processed_outcome(&self, event: EventId) -> Option<Outcome> {
        match &self.events.get(&event)?.state {
            EventState::Processed(o) => Some(o.clone()),
            _ => None,
        }
    }

    fn fire(&mut self, event: EventId) {
        let now = self.now;
        let Some(slot) = self.events.get_mut(&event) else {
            return;
        };

        let outcome = match std::mem::replace(&mut slot.state, EventState::Pending) {
            EventState::Pending => Ok(Value::None),
            EventState::Triggered(o) => o,
            processed @ EventState::Processed(_) => {
                slot.state = processed;
                trace!(%event, "already processed, skipping duplicate entry");
                return;
            }
        };
        let ok = outcome.is_ok();
        slot.state = EventState::Processed(outcome);
        let callbacks = std::mem::take(&mut slot.callbacks);
        let internal = slot.internal;

        self.events_processed += 1;
        trace!(%event, time = %now, ok, callbacks = callbacks.len(), "fire");

        let pending = self.scheduler.len();
        if let Some(log) = self.log.as_mut() {
            log.record(now, event, ok);
            if log.should_checkpoint(self.events_processed) {
                log.add_checkpoint(self.events_processed, now, pending);
            }
        }

        for callback in callbacks {
            self.dispatch(event, callback);
        }
        self.retire(event, internal);
    }

    /// Drop a processed event's slot once nothing may look at it again.
    ///
    /// Kernel-internal events go at once; the rest are kept until they fall
    /// out of the retention window.
    fn retire(&mut self, event: EventId, internal: bool) {
        if internal {
            self.events.remove(&event);
            return;
        }
        let EventRetention::Recent(keep) = self.retention else {
            return;
        };
        self.retained.push_back(event);
        while self.retained.len() > keep {
            if let Some(old) = self.retained.pop_front() {
                self.events.remove(&old);
            }
        }
    }

    fn dispatch(&mut self, event: EventId, callback: Callback) {
        match callback {
            Callback::Resume(pid) => self.resume_process(pid, event),
            Callback::Condition(composite) => self.check_condition(composite, event),
            Callback::Interrupt(pid) => self.deliver_interrupt(pid, event),
            Callback::User(f) => f(self, event),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.now)
            .field("events", &self.events.len())
            .field("pending", &self.scheduler.len())
            .field("processes", &self.processes.len())
            .field("resources", &self.resources.len())
            .field("events_processed", &self.events_processed)
            .finish()
    }
}
