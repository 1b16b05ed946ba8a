//! Firing log and replay verification.
//!
//! Records every fired event into an append-only log, optionally takes
//! periodic checkpoints, and provides a text export/import plus a
//! deterministic hash so two runs can be compared cheaply.

use std::io::{self, BufRead, Write};

use crate::event::EventId;
use crate::time::VirtualTime;

// ── Hash utility ──────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

// ── Records ───────────────────────────────────────────────────────────

/// One fired event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct FiringRecord {
    /// Position in firing order, starting at 0.
    pub index: u64,
    pub time: VirtualTime,
    pub event: EventId,
    /// Whether the event succeeded.
    pub ok: bool,
}

/// Queue state sampled every N firings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Checkpoint {
    /// Number of events fired when this checkpoint was taken.
    pub event_index: u64,
    pub time: VirtualTime,
    /// Queue entries still waiting at that point.
    pub pending: usize,
}

// ── Event Log ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<FiringRecord>,
    checkpoints: Vec<Checkpoint>,
    checkpoint_interval: Option<u64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log with an automatic checkpoint every `n` firings.
    pub fn with_checkpoint_interval(n: u64) -> Self {
        EventLog {
            checkpoint_interval: Some(n),
            ..Self::default()
        }
    }

    pub fn record(&mut self, time: VirtualTime, event: EventId, ok: bool) {
        let index = self.records.len() as u64;
        self.records.push(FiringRecord {
            index,
            time,
            event,
            ok,
        });
    }

    pub fn add_checkpoint(&mut self, event_index: u64, time: VirtualTime, pending: usize) {
        self.checkpoints.push(Checkpoint {
            event_index,
            time,
            pending,
        });
    }

    /// Check if a checkpoint is due at this firing count.
    pub fn should_checkpoint(&self, events_processed: u64) -> bool {
        match self.checkpoint_interval {
            Some(n) if n > 0 => events_processed % n == 0,
            _ => false,
        }
    }

    pub fn records(&self) -> &[FiringRecord] {
        &self.records
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deterministic hash over the firing order, times and outcomes.
    pub fn log_hash(&self) -> u64 {
        self.records.iter().fold(0, |h, r| {
            let h = hash_combine(h, r.event.raw());
            let h = hash_combine(h, r.time.ticks());
            hash_combine(h, r.ok as u64)
        })
    }

    /// Index of the first record where two logs disagree, or `None` if they
    /// are identical.
    pub fn first_divergence(&self, other: &EventLog) -> Option<usize> {
        let common = self.records.len().min(other.records.len());
        (0..common)
            .find(|&i| {
                let (a, b) = (&self.records[i], &other.records[i]);
                a.event != b.event || a.time != b.time || a.ok != b.ok
            })
            .or_else(|| (self.records.len() != other.records.len()).then_some(common))
    }

    // ── Export / Import ───────────────────────────────────────────

    /// Write the log in a line-oriented text format.
    ///
    /// ```text
    /// # SIMKERN EVENT LOG v1
    /// F <index> <time> <event> <ok|err>
    /// C <event_index> <time> <pending>
    /// ```
    pub fn export<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "# SIMKERN EVENT LOG v1")?;
        writeln!(w, "# firings: {}", self.records.len())?;
        writeln!(w, "# checkpoints: {}", self.checkpoints.len())?;

        for r in &self.records {
            let status = if r.ok { "ok" } else { "err" };
            writeln!(w, "F {} {} {} {}", r.index, r.time.ticks(), r.event.raw(), status)?;
        }
        for cp in &self.checkpoints {
            writeln!(w, "C {} {} {}", cp.event_index, cp.time.ticks(), cp.pending)?;
        }
        Ok(())
    }

    pub fn import<R: BufRead>(r: R) -> io::Result<Self> {
        let mut log = EventLog::new();

        for line in r.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                ["F", index, time, event, status] => {
                    let ok = match *status {
                        "ok" => true,
                        "err" => false,
                        other => return Err(invalid(format!("bad status: {}", other))),
                    };
                    log.records.push(FiringRecord {
                        index: parse_u64(index, "index")?,
                        time: VirtualTime::new(parse_u64(time, "time")?),
                        event: EventId::new(parse_u64(event, "event")?),
                        ok,
                    });
                }
                ["C", index, time, pending] => {
                    log.checkpoints.push(Checkpoint {
                        event_index: parse_u64(index, "index")?,
                        time: VirtualTime::new(parse_u64(time, "time")?),
                        pending: parse_u64(pending, "pending")? as usize,
                    });
                }
                _ => return Err(invalid(format!("invalid log line: {}", line))),
            }
        }

        Ok(log)
    }
}

fn parse_u64(s: &str, label: &str) -> io::Result<u64> {
    s.parse()
        .map_err(|e| invalid(format!("{}: {}", label, e)))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
