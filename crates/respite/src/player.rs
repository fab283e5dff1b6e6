//! Element player: executes exactly one session element.
//!
//! A player always ends in exactly one terminal [`ElementEvent::Finished`].
//! Whether a skip is *allowed* is not its concern; it accepts every skip and
//! leaves policy to the session runner.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;

use crate::countdown::Countdown;
use crate::definition::{ElementDefinition, ElementKind, ProtocolDefinition};
use crate::error::{DefinitionIssue, EngineError, Result};
use crate::ids::ElementId;
use crate::sequencer::{PhaseEvent, PhaseSequencer, PhaseTick};

/// How an element ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementOutcome {
    Completed,
    Skipped,
    Aborted,
}

/// Events emitted while an element plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementEvent {
    /// Non-terminal breathing event (`Tick` or `PhaseCompleted`).
    Breath(PhaseEvent),
    /// One second of a timed element elapsed.
    Countdown { remaining_seconds: u32 },
    /// A work bout began. Bouts are numbered from 1.
    BoutStarted { bout: u32, of: u32 },
    /// The caller confirmed a work bout.
    BoutCompleted { bout: u32, of: u32 },
    /// One second of the rest before `next_bout` elapsed, or the rest began.
    Rest { remaining_seconds: u32, next_bout: u32 },
    Paused,
    Resumed,
    /// Terminal. Emitted exactly once per player.
    Finished(ElementOutcome),
}

impl ElementEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ElementEvent::Finished(_))
    }

    /// True for events that mark measurable progress inside an element.
    pub fn is_progress_mark(&self) -> bool {
        matches!(
            self,
            ElementEvent::Breath(PhaseEvent::PhaseCompleted { .. })
                | ElementEvent::BoutCompleted { .. }
        )
    }
}

pub type ElementEvents = SmallVec<[ElementEvent; 4]>;

/// What the user should currently see for an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementCue {
    Phase(PhaseTick),
    Countdown { remaining_seconds: u32 },
    Bout { bout: u32, of: u32 },
    Rest { remaining_seconds: u32, next_bout: u32 },
    Finished(ElementOutcome),
}

#[derive(Debug, Clone)]
struct Repetitions {
    total: u32,
    bout: u32,
    rest_seconds: u32,
    resting: Option<Countdown>,
}

#[derive(Debug, Clone)]
enum Mode {
    Breathing(PhaseSequencer),
    Timed(Countdown),
    Repetition(Repetitions),
}

/// Plays one [`ElementDefinition`].
#[derive(Debug, Clone)]
pub struct ElementPlayer {
    element: ElementDefinition,
    mode: Mode,
    paused: bool,
    outcome: Option<ElementOutcome>,
    active: Duration,
    unused: Duration,
    marks: u32,
}

impl ElementPlayer {
    /// Begin playing `element`. Breathing elements need their protocol.
    pub fn start(
        element: ElementDefinition,
        protocol: Option<Arc<ProtocolDefinition>>,
    ) -> Result<Self> {
        let mode = match &element.kind {
            ElementKind::Breathing { protocol: wanted } => {
                let protocol = protocol.filter(|p| &p.id == wanted).ok_or_else(|| {
                    EngineError::invalid_definition(
                        &element.id,
                        DefinitionIssue::UnknownProtocol {
                            element: element.id.to_string(),
                            protocol: wanted.to_string(),
                        },
                    )
                })?;
                Mode::Breathing(PhaseSequencer::new(protocol)?)
            }
            ElementKind::Timed { duration_seconds } => {
                if *duration_seconds == 0 {
                    return Err(EngineError::invalid_definition(
                        &element.id,
                        DefinitionIssue::NonPositiveField {
                            element: element.id.to_string(),
                            field: "durationSeconds",
                        },
                    ));
                }
                Mode::Timed(Countdown::new(*duration_seconds))
            }
            ElementKind::Repetition {
                repetitions,
                rest_seconds,
            } => {
                if *repetitions == 0 {
                    return Err(EngineError::invalid_definition(
                        &element.id,
                        DefinitionIssue::NonPositiveField {
                            element: element.id.to_string(),
                            field: "repetitions",
                        },
                    ));
                }
                Mode::Repetition(Repetitions {
                    total: *repetitions,
                    bout: 1,
                    rest_seconds: *rest_seconds,
                    resting: None,
                })
            }
        };

        tracing::debug!(element = %element.id, kind = element.kind.label(), "element started");
        Ok(Self {
            element,
            mode,
            paused: false,
            outcome: None,
            active: Duration::ZERO,
            unused: Duration::ZERO,
            marks: 0,
        })
    }

    pub fn element(&self) -> &ElementDefinition {
        &self.element
    }

    pub fn element_id(&self) -> &ElementId {
        &self.element.id
    }

    pub fn outcome(&self) -> Option<ElementOutcome> {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Unpaused time spent in this element.
    pub fn active_elapsed(&self) -> Duration {
        self.active
    }

    /// Time from the last tick that was not needed to finish.
    pub fn unused(&self) -> Duration {
        self.unused
    }

    /// Completed phases or bouts so far.
    pub fn progress_marks(&self) -> u32 {
        self.marks
    }

    pub fn cue(&self) -> ElementCue {
        if let Some(outcome) = self.outcome {
            return ElementCue::Finished(outcome);
        }
        match &self.mode {
            Mode::Breathing(sequencer) => ElementCue::Phase(sequencer.position()),
            Mode::Timed(countdown) => ElementCue::Countdown {
                remaining_seconds: countdown.remaining_seconds(),
            },
            Mode::Repetition(reps) => match &reps.resting {
                Some(rest) => ElementCue::Rest {
                    remaining_seconds: rest.remaining_seconds(),
                    next_bout: reps.bout + 1,
                },
                None => ElementCue::Bout {
                    bout: reps.bout,
                    of: reps.total,
                },
            },
        }
    }

    /// Advance by `elapsed`. Paused or finished players ignore time.
    pub fn tick(&mut self, elapsed: Duration) -> ElementEvents {
        let mut events = ElementEvents::new();
        if self.paused || self.is_finished() {
            return events;
        }

        let mut unused = Duration::ZERO;
        let mut finished = false;
        match &mut self.mode {
            Mode::Breathing(sequencer) => {
                for event in sequencer.tick(elapsed) {
                    match event {
                        PhaseEvent::Completed => finished = true,
                        event => events.push(ElementEvent::Breath(event)),
                    }
                }
                if finished {
                    unused = sequencer.unused();
                }
            }
            Mode::Timed(countdown) => {
                let step = countdown.tick(elapsed);
                events.extend(
                    step.remaining
                        .into_iter()
                        .map(|remaining_seconds| ElementEvent::Countdown { remaining_seconds }),
                );
                finished = step.finished;
                unused = step.unused;
            }
            Mode::Repetition(reps) => {
                if let Some(rest) = reps.resting.as_mut() {
                    let step = rest.tick(elapsed);
                    let next_bout = reps.bout + 1;
                    events.extend(step.remaining.into_iter().map(|remaining_seconds| {
                        ElementEvent::Rest {
                            remaining_seconds,
                            next_bout,
                        }
                    }));
                    if step.finished {
                        reps.resting = None;
                        reps.bout = next_bout;
                        events.push(ElementEvent::BoutStarted {
                            bout: reps.bout,
                            of: reps.total,
                        });
                    }
                }
            }
        }

        self.marks += events.iter().filter(|e| e.is_progress_mark()).count() as u32;
        self.active += elapsed.saturating_sub(unused);
        if finished {
            self.unused = unused;
            events.push(self.finish(ElementOutcome::Completed));
        }
        events
    }

    /// Signal that the user finished the current work bout.
    pub fn complete_bout(&mut self) -> Result<ElementEvents> {
        if self.is_finished() || self.paused {
            return Err(self.reject("complete bout"));
        }
        let state = self.state_label();
        let Mode::Repetition(reps) = &mut self.mode else {
            return Err(EngineError::invalid_transition(
                "element",
                "complete bout",
                state,
            ));
        };
        if reps.resting.is_some() {
            return Err(EngineError::invalid_transition(
                "element",
                "complete bout",
                state,
            ));
        }

        let mut events = ElementEvents::new();
        events.push(ElementEvent::BoutCompleted {
            bout: reps.bout,
            of: reps.total,
        });
        self.marks += 1;

        if reps.bout == reps.total {
            events.push(self.finish(ElementOutcome::Completed));
        } else if reps.rest_seconds == 0 {
            reps.bout += 1;
            events.push(ElementEvent::BoutStarted {
                bout: reps.bout,
                of: reps.total,
            });
        } else {
            reps.resting = Some(Countdown::new(reps.rest_seconds));
            events.push(ElementEvent::Rest {
                remaining_seconds: reps.rest_seconds,
                next_bout: reps.bout + 1,
            });
        }
        Ok(events)
    }

    pub fn skip(&mut self) -> Result<ElementEvent> {
        if self.is_finished() {
            return Err(self.reject("skip"));
        }
        if let Mode::Breathing(sequencer) = &mut self.mode {
            sequencer.abort();
        }
        Ok(self.finish(ElementOutcome::Skipped))
    }

    /// Stop immediately. Returns `None` if the element already ended.
    pub fn abort(&mut self) -> Option<ElementEvent> {
        if self.is_finished() {
            return None;
        }
        if let Mode::Breathing(sequencer) = &mut self.mode {
            sequencer.abort();
        }
        Some(self.finish(ElementOutcome::Aborted))
    }

    pub fn pause(&mut self) -> Result<ElementEvent> {
        if self.is_finished() || self.paused {
            return Err(self.reject("pause"));
        }
        if let Mode::Breathing(sequencer) = &mut self.mode {
            sequencer.pause()?;
        }
        self.paused = true;
        Ok(ElementEvent::Paused)
    }

    pub fn resume(&mut self) -> Result<ElementEvent> {
        if !self.paused || self.is_finished() {
            return Err(self.reject("resume"));
        }
        if let Mode::Breathing(sequencer) = &mut self.mode {
            sequencer.resume()?;
        }
        self.paused = false;
        Ok(ElementEvent::Resumed)
    }

    fn finish(&mut self, outcome: ElementOutcome) -> ElementEvent {
        self.outcome = Some(outcome);
        self.paused = false;
        tracing::debug!(element = %self.element.id, ?outcome, "element finished");
        ElementEvent::Finished(outcome)
    }

    fn reject(&self, action: &'static str) -> EngineError {
        EngineError::invalid_transition("element", action, self.state_label())
    }

    fn state_label(&self) -> String {
        if let Some(outcome) = self.outcome {
            return format!("{outcome:?}").to_lowercase();
        }
        if self.paused {
            return "paused".into();
        }
        match &self.mode {
            Mode::Repetition(reps) if reps.resting.is_some() => "resting".into(),
            Mode::Breathing(_) => "breathing".into(),
            Mode::Timed(_) => "timed".into(),
            Mode::Repetition(_) => "in a work bout".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Phase;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn terminals(events: &[ElementEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    fn breathing_player() -> ElementPlayer {
        let protocol = Arc::new(
            ProtocolDefinition::new("in-out", vec![Phase::new("in", 2), Phase::new("out", 2)], 2)
                .unwrap(),
        );
        ElementPlayer::start(ElementDefinition::breathing("b", 1, "in-out"), Some(protocol))
            .unwrap()
    }

    #[test]
    fn test_breathing_completes_when_protocol_finishes() {
        let mut player = breathing_player();
        let mut all = Vec::new();
        for _ in 0..7 {
            all.extend(player.tick(secs(1)));
        }
        assert_eq!(terminals(&all), 0);
        all.extend(player.tick(secs(1)));
        assert_eq!(all.last(), Some(&ElementEvent::Finished(ElementOutcome::Completed)));
        assert_eq!(player.progress_marks(), 4);
        assert_eq!(player.active_elapsed(), secs(8));
    }

    #[test]
    fn test_breathing_requires_matching_protocol() {
        let err = ElementPlayer::start(ElementDefinition::breathing("b", 1, "box"), None)
            .unwrap_err();
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_timed_element_fires_at_zero() {
        let mut player = ElementPlayer::start(ElementDefinition::timed("t", 1, 3), None).unwrap();
        let events = player.tick(secs(2));
        assert_eq!(
            events.as_slice(),
            &[
                ElementEvent::Countdown { remaining_seconds: 2 },
                ElementEvent::Countdown { remaining_seconds: 1 },
            ]
        );
        let events = player.tick(secs(3));
        assert_eq!(
            events.as_slice(),
            &[
                ElementEvent::Countdown { remaining_seconds: 0 },
                ElementEvent::Finished(ElementOutcome::Completed),
            ]
        );
        assert_eq!(player.unused(), secs(2));
        assert_eq!(player.active_elapsed(), secs(3));
    }

    #[test]
    fn test_repetitions_alternate_work_and_rest() {
        let mut player =
            ElementPlayer::start(ElementDefinition::repetition("r", 1, 2, 3), None).unwrap();
        assert_eq!(player.cue(), ElementCue::Bout { bout: 1, of: 2 });

        // work bouts are unbounded
        assert!(player.tick(secs(60)).is_empty());

        let events = player.complete_bout().unwrap();
        assert_eq!(
            events.as_slice(),
            &[
                ElementEvent::BoutCompleted { bout: 1, of: 2 },
                ElementEvent::Rest { remaining_seconds: 3, next_bout: 2 },
            ]
        );
        assert!(player.complete_bout().is_err(), "cannot finish a bout while resting");

        let events = player.tick(secs(3));
        assert_eq!(events.last(), Some(&ElementEvent::BoutStarted { bout: 2, of: 2 }));

        let events = player.complete_bout().unwrap();
        assert_eq!(
            events.as_slice(),
            &[
                ElementEvent::BoutCompleted { bout: 2, of: 2 },
                ElementEvent::Finished(ElementOutcome::Completed),
            ],
            "final bout has no trailing rest"
        );
    }

    #[test]
    fn test_zero_rest_starts_next_bout_immediately() {
        let mut player =
            ElementPlayer::start(ElementDefinition::repetition("r", 1, 3, 0), None).unwrap();
        let events = player.complete_bout().unwrap();
        assert_eq!(events.last(), Some(&ElementEvent::BoutStarted { bout: 2, of: 3 }));
    }

    #[test]
    fn test_complete_bout_rejected_for_timed() {
        let mut player = ElementPlayer::start(ElementDefinition::timed("t", 1, 3), None).unwrap();
        assert!(matches!(
            player.complete_bout(),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_only_one_terminal_event() {
        let mut player = breathing_player();
        assert_eq!(player.skip().unwrap(), ElementEvent::Finished(ElementOutcome::Skipped));
        assert!(player.skip().is_err());
        assert_eq!(player.abort(), None);
        assert!(player.tick(secs(100)).is_empty());
        assert_eq!(player.outcome(), Some(ElementOutcome::Skipped));
    }

    #[test]
    fn test_skip_accepted_for_mandatory_element() {
        let mut player = ElementPlayer::start(ElementDefinition::timed("t", 1, 3), None).unwrap();
        assert!(!player.element().is_optional);
        assert!(player.skip().is_ok());
    }

    #[test]
    fn test_pause_freezes_countdown() {
        let mut player = ElementPlayer::start(ElementDefinition::timed("t", 1, 5), None).unwrap();
        player.tick(secs(2));
        assert_eq!(player.pause().unwrap(), ElementEvent::Paused);
        assert!(player.pause().is_err());
        assert!(player.tick(secs(10)).is_empty());
        assert_eq!(player.resume().unwrap(), ElementEvent::Resumed);
        assert_eq!(player.cue(), ElementCue::Countdown { remaining_seconds: 3 });
        assert_eq!(player.active_elapsed(), secs(2));
    }

    #[test]
    fn test_abort_while_paused_is_terminal() {
        let mut player = breathing_player();
        player.pause().unwrap();
        assert_eq!(player.abort(), Some(ElementEvent::Finished(ElementOutcome::Aborted)));
        assert!(player.resume().is_err());
    }
}
