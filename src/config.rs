//! Construction-time configuration and the fluent environment builder.
//!
//! Everything that must be fixed before the first event is scheduled lives
//! here: the starting clock, the random seed, whether firings are logged and
//! how long processed events stay inspectable.

use crate::environment::Environment;
use crate::eventlog::EventLog;
use crate::random::{RandomSource, SplitMix64};
use crate::time::VirtualTime;

// ── Config ────────────────────────────────────────────────────────────

/// Whether and how the environment records its firing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum LoggingConfig {
    #[default]
    Off,
    On,
    /// Log, and take a checkpoint every `n` firings.
    WithCheckpoints(u64),
}

impl LoggingConfig {
    pub(crate) fn event_log(self) -> Option<EventLog> {
        match self {
            LoggingConfig::Off => None,
            LoggingConfig::On => Some(EventLog::new()),
            LoggingConfig::WithCheckpoints(n) => Some(EventLog::with_checkpoint_interval(n)),
        }
    }
}

/// Processed events kept by default before the oldest are dropped.
pub const DEFAULT_RETAINED_EVENTS: usize = 1 << 16;

/// How long a processed event's outcome stays readable.
///
/// Pending and triggered events are always kept. Kernel-internal events
/// (process start-up, interrupt delivery) are dropped as soon as they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EventRetention {
    /// Keep every processed event for the life of the environment.
    All,
    /// Keep the `n` most recently processed events.
    Recent(usize),
}

impl Default for EventRetention {
    fn default() -> Self {
        EventRetention::Recent(DEFAULT_RETAINED_EVENTS)
    }
}

/// Plain-data settings for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvironmentConfig {
    pub start_time: VirtualTime,
    /// Seed for the default `SplitMix64` source. Ignored when a source is
    /// injected explicitly.
    pub seed: u64,
    pub logging: LoggingConfig,
    pub retention: EventRetention,
}

// ── Builder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Environment`].
///
/// # Example
/// ```rust
/// use simkern::{Environment, VirtualTime};
///
/// let env = Environment::builder()
///     .start_time(VirtualTime::new(100))
///     .seed(42)
///     .with_checkpoints(10)
///     .build();
/// assert_eq!(env.now(), VirtualTime::new(100));
/// assert!(env.event_log().is_some());
/// ```
pub struct EnvironmentBuilder {
    config: EnvironmentConfig,
    rng: Option<Box<dyn RandomSource>>,
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        EnvironmentBuilder {
            config: EnvironmentConfig::default(),
            rng: None,
        }
    }

    /// Start from an existing config.
    pub fn from_config(config: EnvironmentConfig) -> Self {
        EnvironmentBuilder { config, rng: None }
    }

    pub fn start_time(mut self, t: VirtualTime) -> Self {
        self.config.start_time = t;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Use `rng` instead of the default `SplitMix64`.
    pub fn random_source(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Enable the firing log.
    pub fn with_logging(mut self) -> Self {
        self.config.logging = LoggingConfig::On;
        self
    }

    /// Enable the firing log with a checkpoint every `interval` firings.
    pub fn with_checkpoints(mut self, interval: u64) -> Self {
        self.config.logging = LoggingConfig::WithCheckpoints(interval);
        self
    }

    /// Keep only the `n` most recently processed events (at least one).
    pub fn retain_events(mut self, n: usize) -> Self {
        self.config.retention = EventRetention::Recent(n.max(1));
        self
    }

    /// Never drop processed events.
    pub fn retain_all_events(mut self) -> Self {
        self.config.retention = EventRetention::All;
        self
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn build(self) -> Environment {
        let seed = self.config.seed;
        let rng = self
            .rng
            .unwrap_or_else(|| Box::new(SplitMix64::new(seed)));
        Environment::from_parts(&self.config, rng)
    }
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
