//! # simkern: Deterministic Discrete-Event Simulation
//!
//! A process-oriented simulation kernel. Processes are resumable state
//! machines that suspend on events; the environment fires those events in
//! `(time, priority, insertion)` order on a virtual clock. No async, no
//! threads, no wall-clock time, so identical inputs replay identically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │           Environment            │ ← clock, arena, run loop
//! │  ┌────────────┐  ┌────────────┐  │
//! │  │ Processes  │  │ Resources  │  │ ← suspend on / grant events
//! │  └────────────┘  └────────────┘  │
//! │  ┌────────────┐  ┌────────────┐  │
//! │  │   Events   │  │ Conditions │  │ ← outcomes + continuations
//! │  └────────────┘  └────────────┘  │
//! │  ┌────────────┐  ┌────────────┐  │
//! │  │ Scheduler  │  │  EventLog  │  │ ← min-heap, firing record
//! │  └────────────┘  └────────────┘  │
//! └──────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use simkern::{Environment, Outcome, SimResult, Step, Until, Value};
//!
//! let mut env = Environment::new();
//! let counter = env.resource(1).unwrap();
//!
//! let mut request = None;
//! let customer = env.spawn(move |env: &mut Environment, outcome: Outcome| -> SimResult<Step> {
//!     outcome?;
//!     match request.take() {
//!         None => {
//!             let r = env.request(counter)?;
//!             request = Some(r);
//!             Ok(Step::Wait(r.event))
//!         }
//!         Some(r) => {
//!             env.release(r)?;
//!             Ok(Step::Done(Value::from("served")))
//!         }
//!     }
//! });
//!
//! env.run(Until::Forever).unwrap();
//! assert_eq!(env.value(customer.completion), Some(&Value::from("served")));
//! ```

pub mod condition;
pub mod config;
pub mod environment;
pub mod error;
pub mod event;
pub mod eventlog;
pub mod process;
pub mod random;
pub mod resource;
pub mod scheduler;
pub mod snapshot;
pub mod time;
pub mod value;

// Re-exports for convenience.
pub use config::{EnvironmentBuilder, EnvironmentConfig, EventRetention, LoggingConfig};
pub use environment::{Environment, Until};
pub use error::{Interrupt, SimError, SimResult};
pub use event::{EventId, EventState, Outcome};
pub use eventlog::{Checkpoint, EventLog, FiringRecord};
pub use process::{Process, ProcessHandle, ProcessId, Step};
pub use random::{ChaChaSource, RandomSource, SplitMix64};
pub use resource::{Request, RequestState, ResourceId, ResourceKind};
pub use scheduler::{EventPriority, QueueKey};
pub use snapshot::{EnvironmentSnapshot, ProcessSnapshot, ResourceSnapshot};
pub use time::VirtualTime;
pub use value::Value;
