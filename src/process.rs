//! Processes: resumable computations driven by the environment.
//!
//! A process body is an explicit state machine. Each call to `resume`
//! runs it forward until it either names the next event it wants to wait
//! on or finishes. The environment attaches a continuation to that event
//! and calls `resume` again with the event's outcome once it fires.

use tracing::{debug, warn};

use crate::environment::Environment;
use crate::error::{Interrupt, SimError, SimResult};
use crate::event::{Callback, EventId, EventSlot, EventState, Outcome};
use crate::scheduler::{Action, EventPriority};
use crate::value::Value;

// ── Process ID ────────────────────────────────────────────────────────

/// Handle to a process registered with an [`Environment`].
///
/// IDs are never reused, so a handle to a finished process can not alias a
/// newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessId(u64);

impl ProcessId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        ProcessId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P#{}", self.0)
    }
}

/// What `spawn` hands back: the process id plus the event that fires when
/// the process terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub id: ProcessId,
    /// Succeeds with the return value, or fails with the unhandled error.
    pub completion: EventId,
}

impl From<ProcessHandle> for EventId {
    fn from(p: ProcessHandle) -> Self {
        p.completion
    }
}

// ── Process trait ─────────────────────────────────────────────────────

/// What a process does after a resumption.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Suspend until this event fires.
    Wait(EventId),
    /// Terminate successfully with a return value.
    Done(Value),
}

/// Trait implemented by every process body.
///
/// The first resumption receives `Ok(Value::None)`. Later ones receive the
/// outcome of the event named by the previous `Step::Wait`, or
/// `Err(SimError::Interrupted(..))` when the process was interrupted.
/// Returning `Err` terminates the process and fails its completion event.
///
/// # Contract
///
/// Implementations **must**:
/// - Not use global mutable state; reach randomness through `env.rng()`.
/// - Be deterministic for equal inputs.
///
/// # Example
///
/// ```rust
/// use simkern::{Environment, Outcome, SimResult, Step, Value};
///
/// struct Clock { ticks: u32 }
///
/// impl simkern::Process for Clock {
///     fn resume(&mut self, env: &mut Environment, outcome: Outcome) -> SimResult<Step> {
///         outcome?;
///         if self.ticks == 3 {
///             return Ok(Step::Done(Value::Int(env.now().ticks() as i64)));
///         }
///         self.ticks += 1;
///         Ok(Step::Wait(env.timeout(10, Value::None)?))
///     }
/// }
///
/// let mut env = Environment::new();
/// let clock = env.spawn(Clock { ticks: 0 });
/// env.run(clock).unwrap();
/// assert_eq!(env.value(clock.completion), Some(&Value::Int(30)));
/// ```
pub trait Process {
    fn resume(&mut self, env: &mut Environment, outcome: Outcome) -> SimResult<Step>;
}

/// A process backed by a closure, for tests and short scripts.
impl<F> Process for F
where
    F: FnMut(&mut Environment, Outcome) -> SimResult<Step>,
{
    fn resume(&mut self, env: &mut Environment, outcome: Outcome) -> SimResult<Step> {
        (self)(env, outcome)
    }
}

// ── Registry slot ─────────────────────────────────────────────────────

/// Environment-side record of a live process.
///
/// The whole slot is dropped when the process terminates; its completion
/// event carries the result from then on.
pub(crate) struct ProcessSlot {
    name: Option<String>,
    /// `None` while the body is executing.
    body: Option<Box<dyn Process>>,
    completion: EventId,
    /// Event the process is suspended on.
    target: Option<EventId>,
}

impl ProcessSlot {
    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn target(&self) -> Option<EventId> {
        self.target
    }

    fn label(&self, id: ProcessId) -> String {
        match &self.name {
            Some(n) => format!("{}({})", n, id),
            None => id.to_string(),
        }
    }
}

// ── Environment API ───────────────────────────────────────────────────

impl Environment {
    /// Register a process and schedule its first resumption at the current
    /// time.
    pub fn spawn<P>(&mut self, body: P) -> ProcessHandle
    where
        P: Process + 'static,
    {
        self.spawn_boxed(None, Box::new(body))
    }

    /// Like [`spawn`](Self::spawn), with a name shown in logs.
    pub fn spawn_named<P>(&mut self, name: impl Into<String>, body: P) -> ProcessHandle
    where
        P: Process + 'static,
    {
        self.spawn_boxed(Some(name.into()), Box::new(body))
    }

    fn spawn_boxed(&mut self, name: Option<String>, body: Box<dyn Process>) -> ProcessHandle {
        let id = ProcessId(self.next_process);
        self.next_process += 1;
        let completion = self.event();

        let init = self.alloc(EventSlot::internal(Ok(Value::None), Callback::Resume(id)));
        self.queue_now(init, EventPriority::Urgent);

        let slot = ProcessSlot {
            name,
            body: Some(body),
            completion,
            target: Some(init),
        };
        debug!(process = %slot.label(id), time = %self.now(), "spawned");
        self.processes.insert(id, slot);

        ProcessHandle { id, completion }
    }

    /// The process whose body is currently executing, if any.
    pub fn active_process(&self) -> Option<ProcessId> {
        self.active
    }

    /// `true` until the process has terminated.
    pub fn is_alive(&self, pid: ProcessId) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Name of a live process.
    pub fn process_name(&self, pid: ProcessId) -> Option<&str> {
        self.processes.get(&pid)?.name()
    }

    /// The event the process is currently suspended on.
    pub fn process_target(&self, pid: ProcessId) -> Option<EventId> {
        self.processes.get(&pid)?.target()
    }

    /// Completion event of a live process.
    ///
    /// Finished processes are forgotten, so this is `UnknownProcess` for
    /// them; keep the `ProcessHandle` to read their result.
    pub fn completion(&self, pid: ProcessId) -> SimResult<EventId> {
        self.processes
            .get(&pid)
            .map(|p| p.completion)
            .ok_or(SimError::UnknownProcess(pid))
    }

    /// Number of processes that have not terminated.
    pub fn live_processes(&self) -> usize {
        self.processes.len()
    }

    /// `true` if `pid` was handed out by this environment at some point.
    fn was_spawned(&self, pid: ProcessId) -> bool {
        pid.0 < self.next_process
    }

    /// Interrupt a suspended process.
    ///
    /// The process is detached from the event it waits on and resumed, at
    /// the current time and ahead of ordinary events, with
    /// `Err(SimError::Interrupted(Interrupt::Cause(cause)))`. The event it
    /// was waiting on is left untouched.
    ///
    /// Fails with `NothingToInterrupt` if the process is running or has
    /// finished, and with `UnknownProcess` for an id never handed out.
    pub fn interrupt(&mut self, pid: ProcessId, cause: Value) -> SimResult<()> {
        self.interrupt_with(pid, Interrupt::Cause(cause))
    }

    pub(crate) fn interrupt_with(&mut self, pid: ProcessId, interrupt: Interrupt) -> SimResult<()> {
        let Some(slot) = self.processes.get(&pid) else {
            return Err(if self.was_spawned(pid) {
                SimError::NothingToInterrupt(pid)
            } else {
                SimError::UnknownProcess(pid)
            });
        };
        if slot.target.is_none() {
            return Err(SimError::NothingToInterrupt(pid));
        }
        debug!(process = %slot.label(pid), cause = %interrupt, time = %self.now(), "interrupt");

        let delivery = self.alloc(EventSlot::internal(
            Err(SimError::Interrupted(interrupt)),
            Callback::Interrupt(pid),
        ));
        self.queue_now(delivery, EventPriority::Urgent);
        Ok(())
    }

    /// Continuation: `fired` was the event `pid` waits on.
    pub(crate) fn resume_process(&mut self, pid: ProcessId, fired: EventId) {
        let Some(slot) = self.processes.get(&pid) else {
            return;
        };
        if slot.target != Some(fired) {
            return;
        }
        if let Some(outcome) = self.processed_outcome(fired) {
            self.drive(pid, outcome);
        }
    }

    /// Continuation: `delivery` carries an interruption for `pid`.
    pub(crate) fn deliver_interrupt(&mut self, pid: ProcessId, delivery: EventId) {
        let Some(slot) = self.processes.get(&pid) else {
            debug!(process = %pid, "interrupt dropped, process already finished");
            return;
        };
        if let Some(target) = slot.target {
            self.detach_resume(target, pid);
        }
        if let Some(outcome) = self.processed_outcome(delivery) {
            self.drive(pid, outcome);
        }
    }

    /// Run the body until it suspends on a not-yet-processed event or ends.
    fn drive(&mut self, pid: ProcessId, mut outcome: Outcome) {
        let Some(slot) = self.processes.get_mut(&pid) else {
            return;
        };
        let Some(mut body) = slot.body.take() else {
            return;
        };
        slot.target = None;
        let previous = self.active.replace(pid);

        let finished = loop {
            match body.resume(self, outcome) {
                Ok(Step::Wait(event)) => {
                    let ready = match self.state(event) {
                        Err(e) => Some(Err(e)),
                        Ok(EventState::Processed(o)) => Some(o.clone()),
                        Ok(_) => None,
                    };
                    match ready {
                        Some(o) => outcome = o,
                        None => {
                            // Cannot fail: the event was just looked up.
                            let _ = self.attach(event, Callback::Resume(pid));
                            if let Some(slot) = self.processes.get_mut(&pid) {
                                slot.target = Some(event);
                            }
                            break None;
                        }
                    }
                }
                Ok(Step::Done(value)) => break Some(Ok(value)),
                Err(e) => break Some(Err(e)),
            }
        };

        self.active = previous;

        match finished {
            None => {
                if let Some(slot) = self.processes.get_mut(&pid) {
                    slot.body = Some(body);
                }
            }
            Some(result) => {
                let Some(slot) = self.processes.remove(&pid) else {
                    return;
                };
                let completion = slot.completion;
                let label = slot.label(pid);
                match &result {
                    Ok(value) => debug!(process = %label, %value, time = %self.now(), "exited"),
                    Err(error) => {
                        let observed = self
                            .slot(completion)
                            .map_or(false, |s| !s.callbacks.is_empty());
                        if observed {
                            debug!(process = %label, %error, time = %self.now(), "failed");
                        } else {
                            warn!(process = %label, %error, time = %self.now(), "failed with nobody waiting");
                        }
                    }
                }
                drop(body);
                if let Err(e) = self.settle(completion, result, EventPriority::Normal) {
                    debug!(process = %label, error = %e, "completion already triggered");
                }
            }
        }
    }

    fn queue_now(&mut self, event: EventId, priority: EventPriority) {
        let now = self.now();
        self.push_entry(now, priority, Action::Fire(event));
    }
}
