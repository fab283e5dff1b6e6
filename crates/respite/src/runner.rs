//! Session runner: walks the elements of one session definition.
//!
//! The runner is the only place that decides which instance transitions are
//! legal. It owns one [`ElementPlayer`] at a time, turns element terminal
//! events into instance snapshots, and publishes every snapshot to the
//! context's [`SnapshotSink`](crate::sink::SnapshotSink).
//!
//! ```text
//!   not started ──start()──► started ──progress──► in_progress
//!                               │  ▲                  │  ▲
//!                        pause()│  │resume()   pause()│  │resume()
//!                               ▼  │                  ▼  │
//!                              paused ◄──────────────────┘
//!
//!   any live state ──abort()──► abandoned
//!   last element ended ──────► completed
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{DefinitionSource, ResolvedSession};
use crate::clock::duration_ms;
use crate::context::EngineContext;
use crate::definition::ElementKind;
use crate::error::{DefinitionIssue, EngineError, Result};
use crate::ids::{ElementId, InstanceId, SessionId, UserId};
use crate::instance::{AbandonReason, InstanceStatus, Measurements, SessionInstance};
use crate::outcome::{OutcomeRecorder, SessionOutcome};
use crate::player::{ElementCue, ElementEvent, ElementOutcome, ElementPlayer};
use crate::sink::{Transition, TransitionKind};

/// Everything a runner operation produced, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ElementStarted { index: usize, element_id: ElementId },
    Element { index: usize, event: ElementEvent },
    Transition(Box<Transition>),
}

impl SessionEvent {
    pub fn transition(&self) -> Option<&Transition> {
        match self {
            SessionEvent::Transition(transition) => Some(transition),
            _ => None,
        }
    }
}

pub type SessionEvents = Vec<SessionEvent>;

/// Drives one [`SessionInstance`] from start to a terminal status.
#[derive(Debug)]
pub struct SessionRunner {
    session: ResolvedSession,
    ctx: EngineContext,
    instance_id: InstanceId,
    user_id: UserId,
    /// `None` until `start()`.
    instance: Option<SessionInstance>,
    /// Ratings recorded before the instance exists.
    pending: Measurements,
    player: Option<ElementPlayer>,
    resume_to: InstanceStatus,
    paused_ms: u64,
    outcome: Option<SessionOutcome>,
}

impl SessionRunner {
    pub fn new(session: ResolvedSession, user_id: UserId, ctx: EngineContext) -> Self {
        Self {
            session,
            ctx,
            instance_id: InstanceId::new(),
            user_id,
            instance: None,
            pending: Measurements::default(),
            player: None,
            resume_to: InstanceStatus::Started,
            paused_ms: 0,
            outcome: None,
        }
    }

    /// Resolve `session_id` through `source` and build a runner for it.
    pub fn load(
        source: &dyn DefinitionSource,
        session_id: &SessionId,
        user_id: UserId,
        ctx: EngineContext,
    ) -> Result<Self> {
        let session = ResolvedSession::load(source, session_id)?;
        Ok(Self::new(session, user_id, ctx))
    }

    /// Rebuild a runner from the last persisted snapshot.
    ///
    /// The element at `currentElementIndex` restarts from its beginning. A
    /// paused snapshot comes back paused.
    pub fn recover(
        snapshot: SessionInstance,
        source: &dyn DefinitionSource,
        ctx: EngineContext,
    ) -> Result<Self> {
        if snapshot.is_terminal() {
            return Err(EngineError::invalid_transition(
                "session",
                "recover",
                snapshot.status,
            ));
        }
        let session = ResolvedSession::load(source, &snapshot.session_id)?;
        let element_count = session.definition().len();
        if snapshot.current_element_index >= element_count {
            return Err(EngineError::invalid_definition(
                &snapshot.session_id,
                DefinitionIssue::Malformed {
                    message: format!(
                        "snapshot cursor {} is past the last of {} elements",
                        snapshot.current_element_index, element_count
                    ),
                },
            ));
        }

        let mut runner = Self::new(session, snapshot.user_id, ctx);
        runner.instance_id = snapshot.id;
        let mut player = runner.make_player(snapshot.current_element_index)?;
        if snapshot.status == InstanceStatus::Paused {
            player.pause()?;
        }
        runner.resume_to = match snapshot.resume_status {
            Some(status) => status,
            None if snapshot.completed_elements.is_empty() => InstanceStatus::Started,
            None => InstanceStatus::InProgress,
        };
        runner.player = Some(player);

        tracing::info!(
            instance_id = %snapshot.id,
            session_id = %snapshot.session_id,
            status = %snapshot.status,
            element_index = snapshot.current_element_index,
            "session recovered"
        );
        runner.instance = Some(snapshot);
        Ok(runner)
    }

    // ============================================================================
    // Accessors
    // ============================================================================

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn session(&self) -> &ResolvedSession {
        &self.session
    }

    /// Latest snapshot, once started.
    pub fn snapshot(&self) -> Option<&SessionInstance> {
        self.instance.as_ref()
    }

    pub fn status(&self) -> Option<InstanceStatus> {
        self.instance.as_ref().map(|i| i.status)
    }

    pub fn is_started(&self) -> bool {
        self.instance.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.instance.as_ref().is_some_and(SessionInstance::is_terminal)
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn cue(&self) -> Option<ElementCue> {
        self.player.as_ref().map(ElementPlayer::cue)
    }

    pub fn current_element(&self) -> Option<&ElementId> {
        self.player.as_ref().map(ElementPlayer::element_id)
    }

    /// Expected running time of the whole session.
    pub fn nominal_seconds(&self) -> u64 {
        self.session.nominal_seconds(self.ctx.config())
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    pub fn start(&mut self) -> Result<SessionEvents> {
        if let Some(instance) = &self.instance {
            return Err(EngineError::invalid_transition(
                "session",
                "start",
                instance.status,
            ));
        }
        let player = self.make_player(0)?;
        let instance = SessionInstance::begin(
            self.instance_id,
            self.user_id,
            self.session.definition().id().clone(),
            std::mem::take(&mut self.pending),
            self.ctx.now(),
        );

        tracing::info!(
            instance_id = %self.instance_id,
            user_id = %self.user_id,
            session_id = %instance.session_id,
            elements = self.session.definition().len(),
            "session started"
        );

        let mut events = SessionEvents::new();
        self.commit(instance, TransitionKind::Started, None, &mut events);
        self.install(0, player, &mut events);
        Ok(events)
    }

    /// Pump `elapsed` time into the current element.
    ///
    /// Time left over when an element finishes flows into the next one. While
    /// paused, time counts toward the pause timeout instead.
    pub fn tick(&mut self, elapsed: Duration) -> Result<SessionEvents> {
        let status = self.live_status("tick")?;
        let mut events = SessionEvents::new();
        if status.is_terminal() {
            return Ok(events);
        }

        if status == InstanceStatus::Paused {
            self.paused_ms = self.paused_ms.saturating_add(duration_ms(elapsed));
            if let Some(limit) = self.ctx.config().pause_timeout_ms() {
                if self.paused_ms > limit {
                    tracing::warn!(
                        instance_id = %self.instance_id,
                        paused_ms = self.paused_ms,
                        "pause timeout exceeded"
                    );
                    return self.abort(AbandonReason::Timeout);
                }
            }
            return Ok(events);
        }

        let mut remaining = elapsed;
        loop {
            let index = self.cursor();
            let Some(player) = self.player.as_mut() else {
                break;
            };
            let element_events = player.tick(remaining);
            let finished = player.is_finished();
            let unused = player.unused();

            let progressed = element_events.iter().any(ElementEvent::is_progress_mark);
            events.extend(
                element_events
                    .into_iter()
                    .map(|event| SessionEvent::Element { index, event }),
            );
            if progressed {
                self.mark_progress(&mut events);
            }
            if !finished {
                break;
            }
            events.extend(self.advance()?);
            if self.is_terminal() || unused.is_zero() {
                break;
            }
            remaining = unused;
        }
        Ok(events)
    }

    /// Consume the current element's terminal event.
    ///
    /// Called by the runner itself; public so that a duplicate delivery after
    /// a terminal status is a harmless no-op.
    pub fn advance(&mut self) -> Result<SessionEvents> {
        let status = self.live_status("advance")?;
        let mut events = SessionEvents::new();
        if status.is_terminal() {
            return Ok(events);
        }

        let (element_id, outcome) = match &self.player {
            Some(player) => match player.outcome() {
                Some(outcome @ (ElementOutcome::Completed | ElementOutcome::Skipped)) => {
                    (player.element_id().clone(), outcome)
                }
                Some(ElementOutcome::Aborted) => {
                    return Err(EngineError::invalid_transition(
                        "session",
                        "advance",
                        "element aborted",
                    ))
                }
                None => {
                    return Err(EngineError::invalid_transition(
                        "session",
                        "advance",
                        "element running",
                    ))
                }
            },
            None => {
                return Err(EngineError::invalid_transition("session", "advance", status))
            }
        };

        let current = self.current_instance()?;
        let mut next = current.element_ended(&element_id, outcome == ElementOutcome::Skipped);
        if next.status == InstanceStatus::Started {
            next.status = InstanceStatus::InProgress;
        }
        let next_index = next.current_element_index;
        let next_player = if next_index < self.session.definition().len() {
            Some(self.make_player(next_index)?)
        } else {
            None
        };

        tracing::debug!(
            instance_id = %self.instance_id,
            element_id = %element_id,
            ?outcome,
            "element ended"
        );
        self.commit(
            next,
            TransitionKind::ElementEnded {
                element_id,
                outcome,
            },
            None,
            &mut events,
        );

        match next_player {
            Some(player) => self.install(next_index, player, &mut events),
            None => {
                self.player = None;
                let done = self.current_instance()?.completed(self.ctx.now());
                let outcome = OutcomeRecorder::finalize(&done, self.session.definition())?;
                tracing::info!(
                    instance_id = %self.instance_id,
                    flagged = outcome.flagged,
                    "session completed"
                );
                self.commit(done, TransitionKind::Completed, Some(outcome), &mut events);
            }
        }
        Ok(events)
    }

    pub fn pause(&mut self) -> Result<SessionEvents> {
        let status = self.live_status("pause")?;
        if !matches!(status, InstanceStatus::Started | InstanceStatus::InProgress) {
            return Err(EngineError::invalid_transition("session", "pause", status));
        }
        let index = self.cursor();
        let event = self.player_mut("pause")?.pause()?;

        self.resume_to = status;
        self.paused_ms = 0;
        let next = self.current_instance()?.paused_from(status);
        let mut events = vec![SessionEvent::Element { index, event }];
        tracing::info!(instance_id = %self.instance_id, "session paused");
        self.commit(next, TransitionKind::Paused, None, &mut events);
        Ok(events)
    }

    pub fn resume(&mut self) -> Result<SessionEvents> {
        let status = self.live_status("resume")?;
        if status != InstanceStatus::Paused {
            return Err(EngineError::invalid_transition("session", "resume", status));
        }
        let index = self.cursor();
        let event = self.player_mut("resume")?.resume()?;

        self.paused_ms = 0;
        let next = self.current_instance()?.resumed(self.resume_to);
        let mut events = vec![SessionEvent::Element { index, event }];
        tracing::info!(instance_id = %self.instance_id, status = %self.resume_to, "session resumed");
        self.commit(next, TransitionKind::Resumed, None, &mut events);
        Ok(events)
    }

    /// Skip the current element. Skipping a mandatory element is allowed but
    /// shows up as a policy violation on the outcome.
    pub fn skip(&mut self) -> Result<SessionEvents> {
        let status = self.live_status("skip")?;
        if !matches!(status, InstanceStatus::Started | InstanceStatus::InProgress) {
            return Err(EngineError::invalid_transition("session", "skip", status));
        }
        let index = self.cursor();
        let instance_id = self.instance_id;
        let player = self.player_mut("skip")?;
        let event = player.skip()?;
        if !player.element().is_optional {
            tracing::warn!(
                instance_id = %instance_id,
                element_id = %player.element_id(),
                order = player.element().order,
                "mandatory element skipped"
            );
        }

        let mut events = vec![SessionEvent::Element { index, event }];
        events.extend(self.advance()?);
        Ok(events)
    }

    /// Forward the "bout done" signal to a repetition element.
    pub fn complete_bout(&mut self) -> Result<SessionEvents> {
        let status = self.live_status("complete bout")?;
        if !matches!(status, InstanceStatus::Started | InstanceStatus::InProgress) {
            return Err(EngineError::invalid_transition(
                "session",
                "complete bout",
                status,
            ));
        }
        let index = self.cursor();
        let player = self.player_mut("complete bout")?;
        let element_events = player.complete_bout()?;
        let finished = player.is_finished();

        let mut events: SessionEvents = element_events
            .into_iter()
            .map(|event| SessionEvent::Element { index, event })
            .collect();
        self.mark_progress(&mut events);
        if finished {
            events.extend(self.advance()?);
        }
        Ok(events)
    }

    /// Stop the run. Valid from any live status.
    pub fn abort(&mut self, reason: AbandonReason) -> Result<SessionEvents> {
        let status = self.live_status("abort")?;
        if status.is_terminal() {
            return Err(EngineError::invalid_transition("session", "abort", status));
        }
        let index = self.cursor();
        let mut events = SessionEvents::new();
        if let Some(event) = self.player.as_mut().and_then(ElementPlayer::abort) {
            events.push(SessionEvent::Element { index, event });
        }
        self.player = None;

        let done = self.current_instance()?.abandoned(reason, self.ctx.now());
        let outcome = OutcomeRecorder::finalize(&done, self.session.definition())?;
        tracing::info!(
            instance_id = %self.instance_id,
            ?reason,
            element_index = index,
            "session abandoned"
        );
        self.commit(
            done,
            TransitionKind::Abandoned { reason },
            Some(outcome),
            &mut events,
        );
        Ok(events)
    }

    // ============================================================================
    // Measurements
    // ============================================================================

    pub fn record_craving_before(&mut self, value: i32) -> Result<SessionEvents> {
        let value = self.ctx.config().check_craving(value)?;
        self.record("record craving before", false, |m| m.craving_before = Some(value))
    }

    pub fn record_craving_after(&mut self, value: i32) -> Result<SessionEvents> {
        let value = self.ctx.config().check_craving(value)?;
        self.record("record craving after", true, |m| m.craving_after = Some(value))
    }

    pub fn record_mood_before(&mut self, mood: impl Into<String>) -> Result<SessionEvents> {
        let mood = mood.into();
        self.record("record mood before", false, |m| m.mood_before = Some(mood))
    }

    pub fn record_mood_after(&mut self, mood: impl Into<String>) -> Result<SessionEvents> {
        let mood = mood.into();
        self.record("record mood after", true, |m| m.mood_after = Some(mood))
    }

    /// Before-ratings may precede `start()`; after-ratings may follow
    /// termination, in which case the outcome is recomputed.
    fn record(
        &mut self,
        action: &'static str,
        after: bool,
        apply: impl FnOnce(&mut Measurements),
    ) -> Result<SessionEvents> {
        let mut events = SessionEvents::new();
        let Some(current) = &self.instance else {
            if after {
                return Err(EngineError::invalid_transition("session", action, "not started"));
            }
            apply(&mut self.pending);
            return Ok(events);
        };
        if current.is_terminal() && !after {
            return Err(EngineError::invalid_transition("session", action, current.status));
        }

        let mut measurements = current.measurements.clone();
        apply(&mut measurements);
        let next = current.with_measurements(measurements);
        let outcome = if next.is_terminal() {
            Some(OutcomeRecorder::finalize(&next, self.session.definition())?)
        } else {
            None
        };
        self.commit(next, TransitionKind::MeasurementRecorded, outcome, &mut events);
        Ok(events)
    }

    // ============================================================================
    // Internals
    // ============================================================================

    fn live_status(&self, action: &'static str) -> Result<InstanceStatus> {
        self.status()
            .ok_or_else(|| EngineError::invalid_transition("session", action, "not started"))
    }

    fn current_instance(&self) -> Result<&SessionInstance> {
        self.instance
            .as_ref()
            .ok_or_else(|| EngineError::not_found("instance", self.instance_id))
    }

    fn cursor(&self) -> usize {
        self.instance
            .as_ref()
            .map(|i| i.current_element_index)
            .unwrap_or_default()
    }

    fn player_mut(&mut self, action: &'static str) -> Result<&mut ElementPlayer> {
        self.player
            .as_mut()
            .ok_or_else(|| EngineError::invalid_transition("session", action, "between elements"))
    }

    fn make_player(&self, index: usize) -> Result<ElementPlayer> {
        let definition = self.session.definition();
        let element = definition
            .element(index)
            .ok_or_else(|| EngineError::not_found("element", format!("{}[{index}]", definition.id())))?
            .clone();
        let protocol = match &element.kind {
            ElementKind::Breathing { protocol } => self.session.protocol(protocol).map(Arc::clone),
            _ => None,
        };
        ElementPlayer::start(element, protocol)
    }

    fn install(&mut self, index: usize, player: ElementPlayer, events: &mut SessionEvents) {
        events.push(SessionEvent::ElementStarted {
            index,
            element_id: player.element_id().clone(),
        });
        self.player = Some(player);
    }

    fn mark_progress(&mut self, events: &mut SessionEvents) {
        let Some(current) = &self.instance else {
            return;
        };
        if current.status == InstanceStatus::Started {
            let next = current.with_status(InstanceStatus::InProgress);
            self.commit(next, TransitionKind::Progressed, None, events);
        }
    }

    fn commit(
        &mut self,
        next: SessionInstance,
        kind: TransitionKind,
        outcome: Option<SessionOutcome>,
        events: &mut SessionEvents,
    ) {
        let transition = Transition {
            kind,
            snapshot: next.clone(),
            outcome: outcome.clone(),
        };
        self.ctx.publish(&transition);
        self.instance = Some(next);
        if outcome.is_some() {
            self.outcome = outcome;
        }
        events.push(SessionEvent::Transition(Box::new(transition)));
    }
}
