//! Helpers that pump time the way a host would.

use respite_core::{
    ElementEvent, PhaseEvent, Result, RoutineEvents, RoutineRunner, SessionEvent, SessionEvents,
    SessionRunner,
};
use std::time::Duration;

use crate::ManualClock;

/// Tick `runner` one second at a time, `seconds` times, moving `clock` along.
pub fn pump_seconds(
    runner: &mut SessionRunner,
    clock: &ManualClock,
    seconds: u64,
) -> Result<SessionEvents> {
    let mut events = SessionEvents::new();
    for _ in 0..seconds {
        clock.advance_secs(1);
        events.extend(runner.tick(Duration::from_secs(1))?);
    }
    Ok(events)
}

pub fn pump_routine(
    routine: &mut RoutineRunner,
    clock: &ManualClock,
    seconds: u64,
) -> Result<RoutineEvents> {
    let mut events = RoutineEvents::new();
    for _ in 0..seconds {
        clock.advance_secs(1);
        events.extend(routine.tick(Duration::from_secs(1))?);
    }
    Ok(events)
}

/// Phase events of a session event stream, element wrappers removed.
pub fn phase_events(events: &[SessionEvent]) -> Vec<PhaseEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Element {
                event: ElementEvent::Breath(phase),
                ..
            } => Some(phase.clone()),
            _ => None,
        })
        .collect()
}

pub fn count_ticks(events: &[SessionEvent]) -> usize {
    phase_events(events)
        .iter()
        .filter(|e| matches!(e, PhaseEvent::Tick(_)))
        .count()
}

pub fn count_phase_completions(events: &[SessionEvent]) -> usize {
    phase_events(events)
        .iter()
        .filter(|e| matches!(e, PhaseEvent::PhaseCompleted { .. }))
        .count()
}
