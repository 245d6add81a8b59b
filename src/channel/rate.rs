//! Wall-clock spacing for commands, keepalives, reconnects and stream frames

use std::time::{Duration, Instant};

/// Fires when more than `period` has passed since the last stamp
///
/// A fresh interval is ready immediately. Callers decide when to stamp:
/// commands stamp on every eligible cycle, keepalives only after a
/// successful send.
#[derive(Debug, Clone)]
pub struct Interval {
    period: Duration,
    last: Option<Instant>,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.period,
        }
    }

    pub fn stamp(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
