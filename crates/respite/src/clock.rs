//! Time sources.
//!
//! The engine never reads time on its own. Logical progress comes from the host
//! pumping `tick(elapsed)`; wall timestamps for `startedAt`/`completedAt` come
//! from an injected [`WallClock`].

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Resolution of every countdown in the engine.
pub const TICK_MS: u64 = 1_000;

/// Source of wall-clock timestamps for instance records.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Accumulates pumped time and releases it in whole ticks.
///
/// Hosts may call `tick` with arbitrary deltas (a UI frame, a server
/// heartbeat); the fractional remainder is held here until a full tick is due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Pulse {
    carry_ms: u64,
}

impl Pulse {
    /// Add elapsed time and return how many whole ticks are now due.
    pub(crate) fn feed(&mut self, elapsed: Duration) -> u64 {
        let total = self.carry_ms.saturating_add(duration_ms(elapsed));
        self.carry_ms = total % TICK_MS;
        total / TICK_MS
    }

    /// Remove and return the sub-tick remainder.
    pub(crate) fn drain(&mut self) -> Duration {
        Duration::from_millis(std::mem::take(&mut self.carry_ms))
    }
}

pub(crate) fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_carries_fractions() {
        let mut pulse = Pulse::default();
        assert_eq!(pulse.feed(Duration::from_millis(400)), 0);
        assert_eq!(pulse.feed(Duration::from_millis(700)), 1);
        assert_eq!(pulse.feed(Duration::from_millis(2_900)), 3);
        assert_eq!(pulse.drain(), Duration::ZERO);
    }

    #[test]
    fn test_pulse_drain_returns_remainder() {
        let mut pulse = Pulse::default();
        assert_eq!(pulse.feed(Duration::from_millis(2_250)), 2);
        assert_eq!(pulse.drain(), Duration::from_millis(250));
        assert_eq!(pulse.drain(), Duration::ZERO);
    }
}
