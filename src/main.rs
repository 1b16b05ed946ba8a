use std::cell::RefCell;
use std::rc::Rc;

use simkern::{
    Environment, EventLog, Outcome, Process, Request, RequestState, ResourceId,
    SimResult, Step, Until, Value, VirtualTime,
};
use tracing_subscriber::EnvFilter;

const CUSTOMERS: u64 = 12;
const TELLERS: usize = 2;
const SEED: u64 = 42;

#[derive(Debug, Default)]
struct Stats {
    served: u64,
    reneged: u64,
    total_wait: u64,
}

type SharedStats = Rc<RefCell<Stats>>;

// ── Customer ──────────────────────────────────────────────────────────

enum Stage {
    Arrive,
    Queue(Request),
    Serve(Request),
}

/// Joins the teller queue, gives up after `patience` ticks, otherwise is
/// served for `service` ticks.
struct Customer {
    counter: ResourceId,
    priority: i64,
    patience: u64,
    service: u64,
    arrived: VirtualTime,
    stage: Stage,
    stats: SharedStats,
}

impl Process for Customer {
    fn resume(&mut self, env: &mut Environment, outcome: Outcome) -> SimResult<Step> {
        let value = outcome?;
        match self.stage {
            Stage::Arrive => {
                self.arrived = env.now();
                let request = env.request_with(self.counter, self.priority, false)?;
                let patience = env.timeout(self.patience, Value::None)?;
                self.stage = Stage::Queue(request);
                Ok(Step::Wait(env.any_of(&[request.event, patience])?))
            }
            Stage::Queue(request) => {
                if value.condition(request.event).is_some() {
                    let waited = env.now().since(self.arrived).unwrap_or(0);
                    self.stats.borrow_mut().total_wait += waited;
                    self.stage = Stage::Serve(request);
                    return Ok(Step::Wait(env.timeout(self.service, Value::None)?));
                }
                match env.request_state(request)? {
                    RequestState::Queued => env.cancel(request)?,
                    RequestState::Granted => env.release(request)?,
                    _ => {}
                }
                self.stats.borrow_mut().reneged += 1;
                Ok(Step::Done(Value::from("reneged")))
            }
            Stage::Serve(request) => {
                env.release(request)?;
                self.stats.borrow_mut().served += 1;
                Ok(Step::Done(Value::from("served")))
            }
        }
    }
}

// ── Arrivals ──────────────────────────────────────────────────────────

fn arrivals(
    counter: ResourceId,
    stats: SharedStats,
) -> impl FnMut(&mut Environment, Outcome) -> SimResult<Step> {
    let mut spawned = 0;
    move |env: &mut Environment, outcome: Outcome| {
        outcome?;
        if spawned == CUSTOMERS {
            return Ok(Step::Done(Value::Int(spawned as i64)));
        }

        let customer = Customer {
            counter,
            priority: if spawned % 4 == 0 { 0 } else { 1 },
            patience: env.rng().next_range(5, 15),
            service: env.rng().next_range(4, 12),
            arrived: env.now(),
            stage: Stage::Arrive,
            stats: stats.clone(),
        };
        env.spawn_named(format!("customer-{}", spawned), customer);
        spawned += 1;

        let gap = env.rng().next_range(1, 6);
        Ok(Step::Wait(env.timeout(gap, Value::None)?))
    }
}

fn run_bank(label: &str) -> SimResult<EventLog> {
    let mut env = Environment::builder()
        .seed(SEED)
        .with_checkpoints(20)
        .build();
    let counter = env.priority_resource(TELLERS)?;
    let stats = SharedStats::default();

    env.spawn_named("arrivals", arrivals(counter, stats.clone()));
    let fired = env.run(Until::Forever)?;

    let stats = stats.borrow();
    let log = env.event_log().cloned().unwrap_or_default();
    println!(
        "  {}: {} events fired, finished at {}",
        label,
        fired,
        env.now()
    );
    println!(
        "    served {}, reneged {}, mean wait {:.1} ticks",
        stats.served,
        stats.reneged,
        stats.total_wait as f64 / stats.served.max(1) as f64
    );
    for cp in log.checkpoints() {
        println!(
            "    checkpoint: firing #{}, {}, {} pending",
            cp.event_index, cp.time, cp.pending
        );
    }
    Ok(log)
}

fn main() -> SimResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,simkern=info")),
        )
        .with_target(false)
        .init();

    println!("═══════════════════════════════════════════════════════");
    println!("  simkern: bank tellers with impatient customers");
    println!("═══════════════════════════════════════════════════════");
    println!();

    let first = run_bank("Run 1")?;
    let second = run_bank("Run 2")?;

    println!();
    println!("  Verification:");
    println!("    Run 1 log hash: {:016x}", first.log_hash());
    println!("    Run 2 log hash: {:016x}", second.log_hash());
    match first.first_divergence(&second) {
        None => println!("    ✓ Logs are identical, replay is deterministic."),
        Some(i) => println!("    ✗ Logs diverge at firing #{}", i),
    }
    Ok(())
}
