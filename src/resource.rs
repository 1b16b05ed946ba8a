//! Capacity-limited shared resources.
//!
//! One record type serves all three flavours; `ResourceKind` selects how
//! the waiting queue is ordered and whether a request may evict a holder.
//!
//! | Kind | Queue order | Preemption |
//! |---|---|---|
//! | `Fifo` | arrival | never |
//! | `Priority` | `(priority, arrival)` | never |
//! | `Preemptive` | `(priority, arrival)` | strictly stronger requests that opt in |
//!
//! A request is an ordinary event: it succeeds when a unit is granted and
//! fails if it is cancelled, the resource is closed while it waits, or a
//! stronger request evicts it before the grant has fired.
//!
//! A resource only tracks requests that are queued or held. Once a request
//! is released, cancelled or preempted, its final state is kept in a short
//! per-resource history so `request_state` can still answer.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::environment::Environment;
use crate::error::{Interrupt, SimError, SimResult};
use crate::event::EventId;
use crate::process::ProcessId;
use crate::scheduler::EventPriority;
use crate::time::VirtualTime;
use crate::value::Value;

// ── Resource ID ───────────────────────────────────────────────────────

/// Handle to a resource owned by an [`Environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceId(u64);

impl ResourceId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        ResourceId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ResourceKind {
    Fifo,
    Priority,
    Preemptive,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Fifo => write!(f, "fifo"),
            ResourceKind::Priority => write!(f, "priority"),
            ResourceKind::Preemptive => write!(f, "preemptive"),
        }
    }
}

// ── Requests ──────────────────────────────────────────────────────────

/// One acquisition attempt. Wait on `event` to learn when it is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Request {
    pub event: EventId,
    pub resource: ResourceId,
}

impl From<Request> for EventId {
    fn from(r: Request) -> Self {
        r.event
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestState {
    Queued,
    Granted,
    Released,
    /// Withdrawn before being granted, by `cancel` or by closing the resource.
    Cancelled,
    /// Evicted by a stronger request.
    Preempted,
}

/// Queue order. Lower sorts first: smaller priority number, then earlier
/// arrival, then requests that may preempt, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RequestKey {
    priority: i64,
    time: VirtualTime,
    no_preempt: bool,
    sequence: u64,
}

/// Finished requests whose final state each resource remembers.
const FINISHED_REQUESTS_KEPT: usize = 1024;

#[derive(Debug)]
struct RequestInfo {
    key: RequestKey,
    /// Process that issued the request; it is the one interrupted on
    /// preemption.
    owner: Option<ProcessId>,
    /// `Queued` or `Granted`; anything else has been retired.
    state: RequestState,
    granted_at: Option<VirtualTime>,
}

// ── Resource record ───────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct ResourceState {
    id: ResourceId,
    kind: ResourceKind,
    capacity: usize,
    closed: bool,
    /// Granted requests in grant order. `users.len()` is the usage count.
    users: Vec<EventId>,
    queue: BTreeMap<RequestKey, EventId>,
    /// Live requests: queued or granted.
    requests: BTreeMap<EventId, RequestInfo>,
    finished: BTreeMap<EventId, RequestState>,
    finished_order: VecDeque<EventId>,
    next_sequence: u64,
}

impl ResourceState {
    /// Stop tracking `event` and remember how it ended.
    fn retire(&mut self, event: EventId, state: RequestState) -> Option<RequestInfo> {
        let info = self.requests.remove(&event)?;
        self.finished.insert(event, state);
        self.finished_order.push_back(event);
        while self.finished_order.len() > FINISHED_REQUESTS_KEPT {
            if let Some(old) = self.finished_order.pop_front() {
                self.finished.remove(&old);
            }
        }
        Some(info)
    }

    pub(crate) fn tracked_requests(&self) -> usize {
        self.requests.len()
    }

    /// Holder that a request of `priority` may evict: the one with the
    /// greatest key, provided its priority is strictly weaker.
    fn preemptible_holder(&self, priority: i64) -> Option<EventId> {
        let victim = self
            .users
            .iter()
            .filter_map(|e| self.requests.get(e).map(|info| (info.key, *e)))
            .max_by_key(|(key, _)| *key)?;
        (victim.0.priority > priority).then_some(victim.1)
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn usage(&self) -> usize {
        self.users.len()
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

enum Admission {
    Grant,
    Preempt(EventId),
    Enqueue,
}

// ── Environment API ───────────────────────────────────────────────────

impl Environment {
    /// Resource with a FIFO waiting queue.
    pub fn resource(&mut self, capacity: usize) -> SimResult<ResourceId> {
        self.new_resource(ResourceKind::Fifo, capacity)
    }

    /// Resource whose queue is ordered by request priority.
    pub fn priority_resource(&mut self, capacity: usize) -> SimResult<ResourceId> {
        self.new_resource(ResourceKind::Priority, capacity)
    }

    /// Priority resource where opted-in requests may evict weaker holders.
    pub fn preemptive_resource(&mut self, capacity: usize) -> SimResult<ResourceId> {
        self.new_resource(ResourceKind::Preemptive, capacity)
    }

    fn new_resource(&mut self, kind: ResourceKind, capacity: usize) -> SimResult<ResourceId> {
        if capacity == 0 {
            return Err(SimError::InvalidCapacity);
        }
        let id = ResourceId(self.resources.len() as u64);
        self.resources.push(ResourceState {
            id,
            kind,
            capacity,
            closed: false,
            users: Vec::new(),
            queue: BTreeMap::new(),
            requests: BTreeMap::new(),
            finished: BTreeMap::new(),
            finished_order: VecDeque::new(),
            next_sequence: 0,
        });
        debug!(resource = %id, %kind, capacity, "resource created");
        Ok(id)
    }

    /// Request one unit with default priority.
    pub fn request(&mut self, resource: ResourceId) -> SimResult<Request> {
        self.request_with(resource, 0, false)
    }

    /// Request one unit.
    ///
    /// Lower `priority` numbers are served first. `priority` is ignored by
    /// FIFO resources and `preempt` is ignored by everything but
    /// preemptive resources.
    pub fn request_with(
        &mut self,
        resource: ResourceId,
        priority: i64,
        preempt: bool,
    ) -> SimResult<Request> {
        if self.resource_ref(resource)?.closed {
            return Err(SimError::ResourceClosed(resource));
        }

        let now = self.now();
        let owner = self.active;
        let event = self.event();

        let res = self.resource_mut(resource)?;
        let (priority, preempt) = match res.kind {
            ResourceKind::Fifo => (0, false),
            ResourceKind::Priority => (priority, false),
            ResourceKind::Preemptive => (priority, preempt),
        };
        let key = RequestKey {
            priority,
            time: now,
            no_preempt: !preempt,
            sequence: res.next_sequence,
        };
        res.next_sequence += 1;
        res.requests.insert(
            event,
            RequestInfo {
                key,
                owner,
                state: RequestState::Queued,
                granted_at: None,
            },
        );

        let victim = if preempt {
            res.preemptible_holder(priority)
        } else {
            None
        };
        let admission = if res.users.len() < res.capacity {
            Admission::Grant
        } else if let Some(victim) = victim {
            Admission::Preempt(victim)
        } else {
            res.queue.insert(key, event);
            Admission::Enqueue
        };

        match admission {
            Admission::Grant => self.grant(resource, event),
            Admission::Preempt(victim) => {
                self.evict(resource, victim, owner);
                self.grant(resource, event);
            }
            Admission::Enqueue => {
                debug!(%resource, request = %event, priority, "queued");
            }
        }

        Ok(Request { event, resource })
    }

    /// Give back a granted unit and hand it to the next waiter, if any.
    pub fn release(&mut self, request: Request) -> SimResult<()> {
        let res = self.resource_mut(request.resource)?;
        let granted = res
            .requests
            .get(&request.event)
            .map_or(false, |info| info.state == RequestState::Granted);
        if !granted {
            return Err(SimError::NotGranted(request.event));
        }
        res.retire(request.event, RequestState::Released);
        res.users.retain(|e| *e != request.event);
        debug!(resource = %request.resource, request = %request.event, usage = res.users.len(), "released");

        self.grant_waiting(request.resource);
        Ok(())
    }

    /// Withdraw a queued request. Its event fails with `Cancelled`.
    pub fn cancel(&mut self, request: Request) -> SimResult<()> {
        let res = self.resource_mut(request.resource)?;
        let key = res
            .requests
            .get(&request.event)
            .filter(|info| info.state == RequestState::Queued)
            .map(|info| info.key)
            .ok_or(SimError::NotQueued(request.event))?;
        res.queue.remove(&key);
        res.retire(request.event, RequestState::Cancelled);
        debug!(resource = %request.resource, request = %request.event, "cancelled");

        self.settle(request.event, Err(SimError::Cancelled), EventPriority::Normal)
    }

    /// Tear the resource down.
    ///
    /// Every queued request fails with `ResourceClosed`; later requests are
    /// rejected. Current holders keep their units and may still release.
    /// Returns the number of queued requests that were failed.
    pub fn close_resource(&mut self, resource: ResourceId) -> SimResult<usize> {
        let res = self.resource_mut(resource)?;
        res.closed = true;
        let waiting: Vec<EventId> = std::mem::take(&mut res.queue).into_values().collect();
        for &event in &waiting {
            res.retire(event, RequestState::Cancelled);
        }
        debug!(%resource, failed = waiting.len(), "closed");

        for &event in &waiting {
            self.settle(event, Err(SimError::ResourceClosed(resource)), EventPriority::Normal)?;
        }
        Ok(waiting.len())
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn resource_kind(&self, resource: ResourceId) -> SimResult<ResourceKind> {
        Ok(self.resource_ref(resource)?.kind)
    }

    pub fn capacity(&self, resource: ResourceId) -> SimResult<usize> {
        Ok(self.resource_ref(resource)?.capacity)
    }

    /// Units currently granted.
    pub fn usage(&self, resource: ResourceId) -> SimResult<usize> {
        Ok(self.resource_ref(resource)?.users.len())
    }

    /// Requests waiting for a unit.
    pub fn queue_len(&self, resource: ResourceId) -> SimResult<usize> {
        Ok(self.resource_ref(resource)?.queue.len())
    }

    /// Granted requests, in grant order.
    pub fn users(&self, resource: ResourceId) -> SimResult<Vec<Request>> {
        let res = self.resource_ref(resource)?;
        Ok(res
            .users
            .iter()
            .map(|&event| Request { event, resource })
            .collect())
    }

    /// Waiting requests, in the order they will be granted.
    pub fn queued(&self, resource: ResourceId) -> SimResult<Vec<Request>> {
        let res = self.resource_ref(resource)?;
        Ok(res
            .queue
            .values()
            .map(|&event| Request { event, resource })
            .collect())
    }

    /// Where a request stands.
    ///
    /// Finished requests answer from a bounded history; once a request has
    /// dropped out of it this is `UnknownEvent`.
    pub fn request_state(&self, request: Request) -> SimResult<RequestState> {
        let res = self.resource_ref(request.resource)?;
        res.requests
            .get(&request.event)
            .map(|info| info.state)
            .or_else(|| res.finished.get(&request.event).copied())
            .ok_or(SimError::UnknownEvent(request.event))
    }

    pub fn is_closed(&self, resource: ResourceId) -> SimResult<bool> {
        Ok(self.resource_ref(resource)?.closed)
    }

    // ── Internals ─────────────────────────────────────────────────

    fn resource_ref(&self, resource: ResourceId) -> SimResult<&ResourceState> {
        self.resources
            .get(resource.index())
            .ok_or(SimError::UnknownResource(resource))
    }

    fn resource_mut(&mut self, resource: ResourceId) -> SimResult<&mut ResourceState> {
        self.resources
            .get_mut(resource.index())
            .ok_or(SimError::UnknownResource(resource))
    }

    fn grant(&mut self, resource: ResourceId, event: EventId) {
        let now = self.now();
        let Ok(res) = self.resource_mut(resource) else {
            return;
        };
        res.users.push(event);
        if let Some(info) = res.requests.get_mut(&event) {
            info.state = RequestState::Granted;
            info.granted_at = Some(now);
        }
        debug!(%resource, request = %event, usage = res.users.len(), capacity = res.capacity, "granted");
        debug_assert!(res.users.len() <= res.capacity);

        if let Err(e) = self.settle(event, Ok(Value::None), EventPriority::Normal) {
            debug!(%resource, request = %event, error = %e, "grant on already-triggered request");
        }
    }

    fn grant_waiting(&mut self, resource: ResourceId) {
        loop {
            let next = match self.resource_mut(resource) {
                Ok(res) if res.users.len() < res.capacity => res.queue.pop_first(),
                _ => None,
            };
            match next {
                Some((_, event)) => self.grant(resource, event),
                None => break,
            }
        }
    }

    fn evict(&mut self, resource: ResourceId, victim: EventId, by: Option<ProcessId>) {
        let now = self.now();
        let Ok(res) = self.resource_mut(resource) else {
            return;
        };
        res.users.retain(|e| *e != victim);
        let Some(info) = res.retire(victim, RequestState::Preempted) else {
            return;
        };
        let owner = info.owner;
        let interrupt = Interrupt::Preempted {
            by,
            usage_since: info.granted_at.unwrap_or(now),
            resource,
        };

        // A grant that has not fired yet fails outright; its waiter sees
        // the preemption as the request's outcome.
        if self.redecide(victim, Err(SimError::Interrupted(interrupt.clone()))) {
            debug!(%resource, request = %victim, ?owner, ?by, "preempted before grant fired");
            return;
        }
        debug!(%resource, request = %victim, ?owner, ?by, "preempted");

        if let Some(owner) = owner {
            if let Err(e) = self.interrupt_with(owner, interrupt) {
                debug!(%resource, request = %victim, error = %e, "preempted holder not notified");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::environment::Until;
    use crate::event::Outcome;
    use crate::process::Step;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Acquire, hold for `hold` ticks, release. Records each transition.
    fn customer(
        name: &'static str,
        resource: ResourceId,
        priority: i64,
        preempt: bool,
        hold: u64,
        log: Log,
    ) -> impl FnMut(&mut Environment, Outcome) -> SimResult<Step> {
        let mut request: Option<Request> = None;
        let mut holding = false;
        move |env: &mut Environment, outcome: Outcome| {
            let now = env.now().ticks();
            if let Err(e) = outcome {
                let what = if e.is_preemption() { "preempted" } else { "failed" };
                log.borrow_mut().push(format!("{} {} @{}", name, what, now));
                return Ok(Step::Done(Value::None));
            }
            match (request, holding) {
                (None, _) => {
                    let r = env.request_with(resource, priority, preempt)?;
                    request = Some(r);
                    Ok(Step::Wait(r.event))
                }
                (Some(_), false) => {
                    holding = true;
                    log.borrow_mut().push(format!("{} got @{}", name, now));
                    Ok(Step::Wait(env.timeout(hold, Value::None)?))
                }
                (Some(r), true) => {
                    env.release(r)?;
                    log.borrow_mut().push(format!("{} done @{}", name, now));
                    Ok(Step::Done(Value::None))
                }
            }
        }
    }

    fn new_log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_fifo_grant_order_is_arrival_order() {
        let mut env = Environment::new();
        let r = env.resource(1).unwrap();
        let log = new_log();
        for name in ["a", "b", "c"] {
            env.spawn(customer(name, r, 0, false, 5, log.clone()));
        }
        env.run(Until::Forever).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["a got @0", "a done @5", "b got @5", "b done @10", "c got @10", "c done @15"]
        );
        assert_eq!(env.usage(r), Ok(0));
    }

    #[test]
    fn test_fifo_ignores_priority() {
        let mut env = Environment::new();
        let r = env.resource(1).unwrap();
        let log = new_log();
        env.spawn(customer("a", r, 5, false, 1, log.clone()));
        env.spawn(customer("b", r, 9, false, 1, log.clone()));
        env.spawn(customer("c", r, -3, true, 1, log.clone()));
        env.run(Until::Forever).unwrap();
        let order: Vec<_> = log.borrow().iter().filter(|l| l.contains("got")).cloned().collect();
        assert_eq!(order, vec!["a got @0", "b got @1", "c got @2"]);
    }

    #[test]
    fn test_capacity_invariant_holds_every_step() {
        let mut env = Environment::new();
        let r = env.resource(2).unwrap();
        let log = new_log();
        for (i, name) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            env.spawn(customer(name, r, 0, false, 3 + i as u64, log.clone()));
        }
        while !env.is_finished() {
            env.step().unwrap();
            let usage = env.usage(r).unwrap();
            assert!(usage <= env.capacity(r).unwrap());
            let users = env.users(r).unwrap();
            assert_eq!(users.len(), usage);
            for u in users {
                assert_eq!(env.request_state(u), Ok(RequestState::Granted));
            }
        }
        assert_eq!(log.borrow().len(), 10);
    }

    #[test]
    fn test_priority_queue_order() {
        let mut env = Environment::new();
        let r = env.priority_resource(1).unwrap();
        let log = new_log();
        env.spawn(customer("holder", r, 0, false, 10, log.clone()));
        env.spawn(customer("low", r, 5, false, 1, log.clone()));
        env.spawn(customer("high", r, 1, false, 1, log.clone()));
        env.spawn(customer("mid", r, 3, false, 1, log.clone()));
        env.spawn(customer("mid2", r, 3, false, 1, log.clone()));

        env.run(VirtualTime::new(1)).unwrap();
        assert_eq!(env.queue_len(r), Ok(4));

        env.run(Until::Forever).unwrap();
        let order: Vec<_> = log.borrow().iter().filter(|l| l.contains("got")).cloned().collect();
        assert_eq!(
            order,
            vec!["holder got @0", "high got @10", "mid got @11", "mid2 got @12", "low got @13"]
        );
    }

    #[test]
    fn test_preemption_evicts_weaker_holder() {
        let mut env = Environment::new();
        let r = env.preemptive_resource(1).unwrap();
        let log = new_log();
        let a = env.spawn(customer("A", r, 1, false, 10, log.clone()));
        let b = env.spawn(customer("B", r, 0, true, 5, log.clone()));

        env.run(Until::Forever).unwrap();
        assert_eq!(*log.borrow(), vec!["A preempted @0", "B got @0", "B done @5"]);
        assert!(env.value(a.completion).is_some());
        assert!(env.value(b.completion).is_some());
        assert_eq!(env.usage(r), Ok(0));
    }

    #[test]
    fn test_preemption_interrupt_carries_details() {
        let mut env = Environment::new();
        let r = env.preemptive_resource(1).unwrap();
        let victim = env.spawn(move |env: &mut Environment, outcome: Outcome| match outcome {
            Ok(Value::None) if env.now().ticks() == 0 && env.usage(r)? == 0 => {
                Ok(Step::Wait(env.request_with(r, 2, false)?.event))
            }
            Ok(_) => Ok(Step::Wait(env.timeout(100, Value::None)?)),
            Err(e) => Err(e),
        });
        let mut stage = 0;
        let attacker = env.spawn(move |env: &mut Environment, outcome: Outcome| {
            outcome?;
            stage += 1;
            match stage {
                1 => Ok(Step::Wait(env.timeout(4, Value::None)?)),
                2 => Ok(Step::Wait(env.request_with(r, 1, true)?.event)),
                _ => Ok(Step::Done(Value::None)),
            }
        });

        env.run(Until::Forever).unwrap();
        assert_eq!(
            env.outcome(victim.completion),
            Some(&Err(SimError::Interrupted(Interrupt::Preempted {
                by: Some(attacker.id),
                usage_since: VirtualTime::ZERO,
                resource: r,
            })))
        );
    }

    #[test]
    fn test_equal_priority_never_preempts() {
        let mut env = Environment::new();
        let r = env.preemptive_resource(1).unwrap();
        let log = new_log();
        env.spawn(customer("A", r, 1, false, 10, log.clone()));
        env.spawn(customer("B", r, 1, true, 5, log.clone()));
        env.run(Until::Forever).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["A got @0", "A done @10", "B got @10", "B done @15"]
        );
    }

    #[test]
    fn test_no_preempt_flag_waits() {
        let mut env = Environment::new();
        let r = env.preemptive_resource(1).unwrap();
        let log = new_log();
        env.spawn(customer("A", r, 5, false, 10, log.clone()));
        env.spawn(customer("B", r, 0, false, 5, log.clone()));
        env.run(Until::Forever).unwrap();
        assert_eq!(log.borrow()[0], "A got @0");
        assert_eq!(log.borrow()[2], "B got @10");
    }

    #[test]
    fn test_preemption_picks_weakest_of_several_holders() {
        let mut env = Environment::new();
        let r = env.preemptive_resource(2).unwrap();
        let strong = env.request_with(r, 1, false).unwrap();
        let weak = env.request_with(r, 4, false).unwrap();
        let attacker = env.request_with(r, 2, true).unwrap();

        assert_eq!(env.request_state(weak), Ok(RequestState::Preempted));
        assert_eq!(env.request_state(strong), Ok(RequestState::Granted));
        assert_eq!(env.request_state(attacker), Ok(RequestState::Granted));
        assert_eq!(env.usage(r), Ok(2));

        // The weak grant had not fired yet, so its event fails instead.
        env.run(Until::Forever).unwrap();
        assert_eq!(
            env.outcome(weak.event),
            Some(&Err(SimError::Interrupted(Interrupt::Preempted {
                by: None,
                usage_since: VirtualTime::ZERO,
                resource: r,
            })))
        );
        assert_eq!(env.value(strong.event), Some(&Value::None));
        assert_eq!(env.release(weak), Err(SimError::NotGranted(weak.event)));
    }

    #[test]
    fn test_preempting_a_fired_grant_leaves_its_outcome() {
        let mut env = Environment::new();
        let r = env.preemptive_resource(1).unwrap();
        let weak = env.request_with(r, 3, false).unwrap();
        env.run(Until::Forever).unwrap();

        let strong = env.request_with(r, 0, true).unwrap();
        env.run(Until::Forever).unwrap();
        assert_eq!(env.value(weak.event), Some(&Value::None));
        assert_eq!(env.request_state(weak), Ok(RequestState::Preempted));
        assert_eq!(env.request_state(strong), Ok(RequestState::Granted));
    }

    #[test]
    fn test_request_churn_keeps_only_live_requests() {
        let mut env = Environment::builder().retain_events(32).build();
        let r = env.resource(2).unwrap();
        for _ in 0..10_000 {
            let held = env.request(r).unwrap();
            let waiting = env.request(r).unwrap();
            let extra = env.request(r).unwrap();
            env.cancel(extra).unwrap();
            env.run(Until::Forever).unwrap();
            env.release(held).unwrap();
            env.release(waiting).unwrap();
        }
        env.run(Until::Forever).unwrap();

        let res = env.resource_ref(r).unwrap();
        assert_eq!(res.tracked_requests(), 0);
        assert!(res.finished.len() <= FINISHED_REQUESTS_KEPT);
        assert!(env.tracked_events() <= 32);
        assert_eq!(env.usage(r), Ok(0));
    }

    #[test]
    fn test_release_errors() {
        let mut env = Environment::new();
        let r = env.resource(1).unwrap();
        let held = env.request(r).unwrap();
        let waiting = env.request(r).unwrap();

        assert_eq!(env.release(waiting), Err(SimError::NotGranted(waiting.event)));
        env.release(held).unwrap();
        assert_eq!(env.release(held), Err(SimError::NotGranted(held.event)));
        assert_eq!(env.request_state(held), Ok(RequestState::Released));
        assert_eq!(env.request_state(waiting), Ok(RequestState::Granted));

        let bogus = Request {
            event: held.event,
            resource: ResourceId::new(9),
        };
        assert_eq!(env.release(bogus), Err(SimError::UnknownResource(ResourceId::new(9))));
    }

    #[test]
    fn test_cancel_queued_request() {
        let mut env = Environment::new();
        let r = env.resource(1).unwrap();
        let held = env.request(r).unwrap();
        let waiting = env.request(r).unwrap();
        let later = env.request(r).unwrap();

        env.cancel(waiting).unwrap();
        assert_eq!(env.queue_len(r), Ok(1));
        assert_eq!(env.cancel(held), Err(SimError::NotQueued(held.event)));

        env.release(held).unwrap();
        env.run(Until::Forever).unwrap();
        assert_eq!(env.outcome(waiting.event), Some(&Err(SimError::Cancelled)));
        assert_eq!(env.request_state(waiting), Ok(RequestState::Cancelled));
        assert_eq!(env.request_state(later), Ok(RequestState::Granted));
    }

    #[test]
    fn test_close_fails_waiters_and_rejects_new_requests() {
        let mut env = Environment::new();
        let r = env.resource(1).unwrap();
        let held = env.request(r).unwrap();
        let w1 = env.request(r).unwrap();
        let w2 = env.request(r).unwrap();

        assert_eq!(env.close_resource(r), Ok(2));
        assert_eq!(env.is_closed(r), Ok(true));
        assert_eq!(env.request(r), Err(SimError::ResourceClosed(r)));

        env.run(Until::Forever).unwrap();
        for w in [w1, w2] {
            assert_eq!(env.outcome(w.event), Some(&Err(SimError::ResourceClosed(r))));
        }
        env.release(held).unwrap();
        assert_eq!(env.usage(r), Ok(0));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut env = Environment::new();
        assert_eq!(env.resource(0), Err(SimError::InvalidCapacity));
        assert_eq!(env.preemptive_resource(0), Err(SimError::InvalidCapacity));
    }

    #[test]
    fn test_interrupted_waiter_cancels_its_request() {
        let mut env = Environment::new();
        let r = env.resource(1).unwrap();
        let _held = env.request(r).unwrap();

        let mut pending: Option<Request> = None;
        let waiter = env.spawn(move |env: &mut Environment, outcome: Outcome| match outcome {
            Ok(_) => {
                let req = env.request(r)?;
                pending = Some(req);
                Ok(Step::Wait(req.event))
            }
            Err(SimError::Interrupted(_)) => {
                if let Some(req) = pending.take() {
                    env.cancel(req)?;
                }
                Ok(Step::Done(Value::from("gave up")))
            }
            Err(e) => Err(e),
        });

        env.run(VirtualTime::new(3)).unwrap();
        assert_eq!(env.queue_len(r), Ok(1));
        env.interrupt(waiter.id, Value::None).unwrap();
        env.run(Until::Forever).unwrap();

        assert_eq!(env.value(waiter.completion), Some(&Value::from("gave up")));
        assert_eq!(env.queue_len(r), Ok(0));
        assert_eq!(env.queued(r), Ok(Vec::new()));
    }
}
