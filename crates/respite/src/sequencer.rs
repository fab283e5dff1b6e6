//! Phase sequencer: runs one breathing protocol.
//!
//! The sequencer walks `cycles` traversals of the protocol's phases. It owns no
//! timer; the host pumps elapsed time through [`PhaseSequencer::tick`] and gets
//! back one [`PhaseEvent::Tick`] per elapsed second plus boundary events.
//!
//! ```text
//! tick(1s) ─► Tick{inhale, remaining 3}
//! tick(1s) ─► Tick{inhale, remaining 2}
//!   ...
//! tick(1s) ─► Tick{inhale, remaining 0}, PhaseCompleted{inhale}
//! tick(1s) ─► Tick{hold, remaining 3}
//!   ...
//! tick(1s) ─► Tick{hold, remaining 0}, PhaseCompleted{hold}, Completed
//! ```

use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Pulse, TICK_MS};
use crate::definition::ProtocolDefinition;
use crate::error::{EngineError, Result};

/// Events emitted by a [`PhaseSequencer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// One second of the current phase elapsed.
    Tick(PhaseTick),
    /// The named phase ran to zero.
    PhaseCompleted {
        phase_index: usize,
        phase_name: String,
        cycle_index: u32,
    },
    /// The last phase of the last cycle finished.
    Completed,
    Paused,
    Resumed,
    /// Stopped before completion.
    Aborted,
}

impl PhaseEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseEvent::Completed | PhaseEvent::Aborted)
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, PhaseEvent::Paused | PhaseEvent::Resumed)
    }
}

/// Snapshot of the sequencer position after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTick {
    pub phase_index: usize,
    pub phase_name: String,
    pub cycle_index: u32,
    pub remaining_seconds: u32,
}

pub type PhaseEvents = SmallVec<[PhaseEvent; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequencerState {
    Running,
    Paused,
    Completed,
    Aborted,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SequencerState::Running => "running",
            SequencerState::Paused => "paused",
            SequencerState::Completed => "completed",
            SequencerState::Aborted => "aborted",
        })
    }
}

/// Executes one [`ProtocolDefinition`].
///
/// Construction starts the sequence; a finished sequencer cannot be restarted.
#[derive(Debug, Clone)]
pub struct PhaseSequencer {
    protocol: Arc<ProtocolDefinition>,
    phase_index: usize,
    cycle_index: u32,
    remaining_ms: u64,
    pulse: Pulse,
    state: SequencerState,
    unused: Duration,
}

impl PhaseSequencer {
    /// Validate the protocol and position the sequencer at the first phase.
    pub fn new(protocol: Arc<ProtocolDefinition>) -> Result<Self> {
        protocol.validate()?;
        let remaining_ms = u64::from(protocol.phases[0].duration_seconds) * TICK_MS;
        Ok(Self {
            protocol,
            phase_index: 0,
            cycle_index: 0,
            remaining_ms,
            pulse: Pulse::default(),
            state: SequencerState::Running,
            unused: Duration::ZERO,
        })
    }

    pub fn protocol(&self) -> &ProtocolDefinition {
        &self.protocol
    }

    /// Current position, usable for rendering before the first tick.
    pub fn position(&self) -> PhaseTick {
        PhaseTick {
            phase_index: self.phase_index,
            phase_name: self.protocol.phases[self.phase_index].name.clone(),
            cycle_index: self.cycle_index,
            remaining_seconds: self.remaining_seconds(),
        }
    }

    /// Fraction of the whole protocol that has elapsed, in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        if self.state == SequencerState::Completed {
            return 1.0;
        }
        let total = self.protocol.total_seconds() * TICK_MS;
        let before_phase: u64 = self.protocol.phases[..self.phase_index]
            .iter()
            .map(|p| u64::from(p.duration_seconds) * TICK_MS)
            .sum();
        let phase_len = u64::from(self.protocol.phases[self.phase_index].duration_seconds) * TICK_MS;
        let elapsed = u64::from(self.cycle_index) * self.protocol.cycle_seconds() * TICK_MS
            + before_phase
            + (phase_len - self.remaining_ms);
        (elapsed as f32 / total as f32).min(1.0)
    }

    pub fn is_paused(&self) -> bool {
        self.state == SequencerState::Paused
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SequencerState::Completed | SequencerState::Aborted
        )
    }

    /// Time handed to the last `tick` that was not needed to finish.
    pub fn unused(&self) -> Duration {
        self.unused
    }

    /// Advance by `elapsed`. Paused or finished sequencers ignore time.
    pub fn tick(&mut self, elapsed: Duration) -> PhaseEvents {
        let mut events = PhaseEvents::new();
        if self.state != SequencerState::Running {
            return events;
        }

        let mut due = self.pulse.feed(elapsed);
        while due > 0 {
            due -= 1;
            self.remaining_ms -= TICK_MS;
            events.push(PhaseEvent::Tick(self.position()));

            if self.remaining_ms == 0 {
                events.push(PhaseEvent::PhaseCompleted {
                    phase_index: self.phase_index,
                    phase_name: self.protocol.phases[self.phase_index].name.clone(),
                    cycle_index: self.cycle_index,
                });
                if self.enter_next_phase() {
                    self.state = SequencerState::Completed;
                    self.unused = Duration::from_millis(due * TICK_MS) + self.pulse.drain();
                    events.push(PhaseEvent::Completed);
                    tracing::debug!(protocol = %self.protocol.id, "protocol completed");
                    break;
                }
            }
        }
        events
    }

    pub fn pause(&mut self) -> Result<PhaseEvent> {
        if self.state != SequencerState::Running {
            return Err(EngineError::invalid_transition(
                "sequencer",
                "pause",
                self.state,
            ));
        }
        self.state = SequencerState::Paused;
        Ok(PhaseEvent::Paused)
    }

    pub fn resume(&mut self) -> Result<PhaseEvent> {
        if self.state != SequencerState::Paused {
            return Err(EngineError::invalid_transition(
                "sequencer",
                "resume",
                self.state,
            ));
        }
        self.state = SequencerState::Running;
        Ok(PhaseEvent::Resumed)
    }

    /// Stop immediately. Returns `None` if the sequence already finished.
    pub fn abort(&mut self) -> Option<PhaseEvent> {
        if self.is_finished() {
            return None;
        }
        self.state = SequencerState::Aborted;
        Some(PhaseEvent::Aborted)
    }

    fn remaining_seconds(&self) -> u32 {
        u32::try_from(self.remaining_ms / TICK_MS).unwrap_or(u32::MAX)
    }

    /// Move to the next phase at its full duration. Returns true when the
    /// last cycle just ended.
    fn enter_next_phase(&mut self) -> bool {
        self.phase_index += 1;
        if self.phase_index == self.protocol.phases.len() {
            self.phase_index = 0;
            self.cycle_index += 1;
            if self.cycle_index == self.protocol.cycles {
                // stay on the final position for rendering
                self.phase_index = self.protocol.phases.len() - 1;
                self.cycle_index -= 1;
                return true;
            }
        }
        self.remaining_ms =
            u64::from(self.protocol.phases[self.phase_index].duration_seconds) * TICK_MS;
        false
    }
}
