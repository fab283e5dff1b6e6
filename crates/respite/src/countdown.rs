//! Single whole-second countdown used by timed elements and rest intervals.

use smallvec::SmallVec;
use std::time::Duration;

use crate::clock::{Pulse, TICK_MS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Countdown {
    remaining_ms: u64,
    pulse: Pulse,
}

#[derive(Debug, Default)]
pub(crate) struct CountdownStep {
    /// Remaining seconds after each elapsed tick.
    pub(crate) remaining: SmallVec<[u32; 4]>,
    pub(crate) finished: bool,
    /// Time past zero.
    pub(crate) unused: Duration,
}

impl Countdown {
    pub(crate) fn new(seconds: u32) -> Self {
        Self {
            remaining_ms: u64::from(seconds) * TICK_MS,
            pulse: Pulse::default(),
        }
    }

    pub(crate) fn remaining_seconds(&self) -> u32 {
        u32::try_from(self.remaining_ms / TICK_MS).unwrap_or(u32::MAX)
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.remaining_ms == 0
    }

    pub(crate) fn tick(&mut self, elapsed: Duration) -> CountdownStep {
        let mut step = CountdownStep::default();
        if self.is_zero() {
            step.unused = elapsed;
            return step;
        }

        let mut due = self.pulse.feed(elapsed);
        while due > 0 {
            due -= 1;
            self.remaining_ms -= TICK_MS;
            step.remaining.push(self.remaining_seconds());
            if self.is_zero() {
                step.finished = true;
                step.unused = Duration::from_millis(due * TICK_MS) + self.pulse.drain();
                break;
            }
        }
        step
    }
}
