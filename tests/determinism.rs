//! Two runs with the same seed must agree on every firing and on the final
//! state; a different seed must produce a different run.

use std::cell::RefCell;
use std::rc::Rc;

use simkern::{
    ChaChaSource, Environment, EnvironmentSnapshot, Outcome, ProcessHandle, RandomSource,
    Request, SimResult, Step, Until, Value,
};

enum Phase {
    Running,
    Waiting(Request),
    Repairing(Request),
}

/// Machines competing for a preemptive repair crew. Urgent breakdowns may
/// bump routine repairs, which then queue up again.
fn workshop(env: &mut Environment, machines: u64) -> Vec<ProcessHandle> {
    let crew = env.preemptive_resource(2).unwrap();
    (0..machines)
        .map(|m| {
            let mut phase = Phase::Running;
            let mut repairs = 0i64;
            let mut priority = 1;
            let body = move |env: &mut Environment, outcome: Outcome| -> SimResult<Step> {
                if let Err(e) = outcome {
                    if !e.is_preemption() {
                        return Err(e);
                    }
                    let req = env.request_with(crew, priority, priority == 0)?;
                    phase = Phase::Waiting(req);
                    return Ok(Step::Wait(req.event));
                }
                match phase {
                    Phase::Running if repairs == 4 => Ok(Step::Done(Value::Int(repairs))),
                    Phase::Running => {
                        let urgent = env.rng().chance(0.25);
                        priority = if urgent { 0 } else { 1 };
                        let req = env.request_with(crew, priority, urgent)?;
                        phase = Phase::Waiting(req);
                        Ok(Step::Wait(req.event))
                    }
                    Phase::Waiting(req) => {
                        phase = Phase::Repairing(req);
                        let repair = env.rng().next_range(2, 9);
                        Ok(Step::Wait(env.timeout(repair, Value::None)?))
                    }
                    Phase::Repairing(req) => {
                        env.release(req)?;
                        repairs += 1;
                        phase = Phase::Running;
                        let uptime = env.rng().next_range(1, 20);
                        Ok(Step::Wait(env.timeout(uptime, Value::None)?))
                    }
                }
            };
            env.spawn_named(format!("machine-{}", m), body)
        })
        .collect()
}

struct RunResult {
    log_hash: u64,
    now: u64,
    snapshot: EnvironmentSnapshot,
    results: Vec<Option<Outcome>>,
}

fn run(env: &mut Environment, machines: u64) -> RunResult {
    let handles = workshop(env, machines);
    env.run(Until::Forever).unwrap();
    RunResult {
        log_hash: env.event_log().unwrap().log_hash(),
        now: env.now().ticks(),
        snapshot: env.snapshot(),
        results: handles
            .iter()
            .map(|h| env.outcome(h.completion).cloned())
            .collect(),
    }
}

fn seeded(seed: u64) -> Environment {
    Environment::builder().seed(seed).with_logging().build()
}

#[test]
fn same_seed_same_run() {
    let a = run(&mut seeded(7), 6);
    let b = run(&mut seeded(7), 6);
    assert_eq!(a.log_hash, b.log_hash);
    assert_eq!(a.now, b.now);
    assert_eq!(a.snapshot, b.snapshot);
    assert_eq!(a.results, b.results);
}

#[test]
fn different_seed_different_run() {
    let a = run(&mut seeded(7), 6);
    let b = run(&mut seeded(8), 6);
    assert_ne!(a.log_hash, b.log_hash);
}

#[test]
fn chacha_source_is_reproducible() {
    let build = || {
        Environment::builder()
            .random_source(Box::new(ChaChaSource::new(2024)))
            .with_checkpoints(5)
            .build()
    };
    let mut e1 = build();
    let mut e2 = build();
    let a = run(&mut e1, 5);
    let b = run(&mut e2, 5);
    assert_eq!(a.log_hash, b.log_hash);
    assert_eq!(
        e1.event_log().unwrap().checkpoints(),
        e2.event_log().unwrap().checkpoints()
    );
    assert_eq!(e1.event_log().unwrap().first_divergence(e2.event_log().unwrap()), None);
}

#[test]
fn independent_environments_share_nothing() {
    // Interleaving two environments step by step must not change either.
    let reference = run(&mut seeded(3), 4);

    let mut x = seeded(3);
    let mut y = seeded(99);
    let hx = workshop(&mut x, 4);
    workshop(&mut y, 4);
    while !x.is_finished() || !y.is_finished() {
        if !x.is_finished() {
            x.step().unwrap();
        }
        if !y.is_finished() {
            y.step().unwrap();
        }
    }
    assert_eq!(x.event_log().unwrap().log_hash(), reference.log_hash);
    let results: Vec<_> = hx.iter().map(|h| x.outcome(h.completion).cloned()).collect();
    assert_eq!(results, reference.results);
}

#[test]
fn user_callbacks_observe_the_same_order() {
    let trace = |seed: u64| {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut env = seeded(seed);
        for i in 0..20u64 {
            let delay = env.rng().next_below(10);
            let ev = env.timeout(delay, Value::Int(i as i64)).unwrap();
            let order = order.clone();
            env.add_callback(ev, move |env: &mut Environment, id| {
                order.borrow_mut().push((env.now().ticks(), id));
            })
            .unwrap();
        }
        env.run(Until::Forever).unwrap();
        let out = order.borrow().clone();
        out
    };
    assert_eq!(trace(11), trace(11));
}
