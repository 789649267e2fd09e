//! Injectable time source.
//!
//! Everything in the dispatcher that needs "now" reads it through [`Clock`],
//! so tests can anchor the daemon at a chosen instant and drive it with
//! tokio's paused time.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock anchored at a chosen instant that advances with the tokio
/// runtime's time source. Under `tokio::time::pause` the runtime's
/// auto-advance moves this clock in lockstep with every `sleep`, which makes
/// multi-day dispatcher scenarios run instantly and deterministically.
#[derive(Debug, Clone)]
pub struct SimClock {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl SimClock {
    /// Anchor the clock so that `now_utc()` reads `base` at the moment of
    /// construction.
    #[must_use]
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for SimClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base + chrono::Duration::milliseconds(millis)
    }
}
