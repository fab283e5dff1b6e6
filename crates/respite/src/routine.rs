//! Routine composer: chains sessions under a total time budget.
//!
//! Constituents run strictly one after another, each through its own
//! [`SessionRunner`]. The first constituent always runs. Before each later one
//! starts, its nominal duration is checked against what is left of the budget;
//! once one does not fit, it and every later constituent are skipped and the
//! routine finishes early.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{DefinitionSource, ResolvedSession};
use crate::clock::{duration_ms, TICK_MS};
use crate::context::EngineContext;
use crate::definition::{Constituent, RoutineDefinition};
use crate::error::{EngineError, Result};
use crate::ids::{InstanceId, RoutineId, SessionId, UserId};
use crate::instance::{AbandonReason, InstanceStatus};
use crate::outcome::{Annotation, SessionOutcome};
use crate::runner::{SessionEvent, SessionEvents, SessionRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstituentStatus {
    Pending,
    Running,
    Completed,
    Abandoned,
    SkippedForBudget,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineStatus {
    NotStarted,
    Running,
    Finished,
    Stopped,
}

impl RoutineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoutineStatus::Finished | RoutineStatus::Stopped)
    }
}

impl std::fmt::Display for RoutineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RoutineStatus::NotStarted => "not started",
            RoutineStatus::Running => "running",
            RoutineStatus::Finished => "finished",
            RoutineStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Events produced by routine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineEvent {
    ConstituentStarted {
        index: usize,
        session_id: SessionId,
    },
    Session {
        index: usize,
        event: SessionEvent,
    },
    ConstituentEnded {
        index: usize,
        status: ConstituentStatus,
    },
    BudgetExceeded {
        index: usize,
        elapsed_seconds: u64,
        nominal_seconds: u64,
        budget_seconds: u64,
    },
    Finished,
    Stopped,
}

pub type RoutineEvents = Vec<RoutineEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstituentReport {
    pub index: usize,
    pub label: String,
    pub session_id: SessionId,
    pub nominal_seconds: u64,
    pub status: ConstituentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
}

/// Summary of a routine run so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineReport {
    pub routine_id: RoutineId,
    pub status: RoutineStatus,
    pub elapsed_seconds: u64,
    pub budget_seconds: u64,
    pub constituents: Vec<ConstituentReport>,
    pub annotations: Vec<Annotation>,
}

impl RoutineReport {
    pub fn count(&self, status: ConstituentStatus) -> usize {
        self.constituents.iter().filter(|c| c.status == status).count()
    }
}

#[derive(Debug)]
struct Plan {
    label: String,
    session: ResolvedSession,
    nominal_seconds: u64,
    status: ConstituentStatus,
    runner: Option<SessionRunner>,
}

/// Runs one [`RoutineDefinition`] for one user.
#[derive(Debug)]
pub struct RoutineRunner {
    definition: Arc<RoutineDefinition>,
    ctx: EngineContext,
    user_id: UserId,
    plans: Vec<Plan>,
    cursor: usize,
    elapsed_ms: u64,
    status: RoutineStatus,
    annotations: Vec<Annotation>,
}

impl RoutineRunner {
    /// Resolve every constituent up front so a dangling reference fails before
    /// the routine starts.
    pub fn new(
        definition: Arc<RoutineDefinition>,
        source: &dyn DefinitionSource,
        user_id: UserId,
        ctx: EngineContext,
    ) -> Result<Self> {
        let mut plans = Vec::with_capacity(definition.constituents().len());
        for constituent in definition.constituents() {
            let session = match constituent {
                Constituent::Session(id) => ResolvedSession::load(source, id)?,
                Constituent::Elements { session, .. } => {
                    ResolvedSession::resolve(source, Arc::new(session.clone()))?
                }
            };
            plans.push(Plan {
                label: constituent.label(),
                nominal_seconds: session.nominal_seconds(ctx.config()),
                session,
                status: ConstituentStatus::Pending,
                runner: None,
            });
        }

        let nominal = plans
            .iter()
            .map(|p| p.nominal_seconds)
            .fold(0, u64::saturating_add);
        let allowed = definition
            .budget_seconds()
            .saturating_add(ctx.config().routine_budget_slack_seconds);
        if nominal > allowed {
            tracing::warn!(
                routine_id = %definition.id(),
                nominal_seconds = nominal,
                budget_seconds = definition.budget_seconds(),
                "routine nominal duration exceeds its budget"
            );
        }

        Ok(Self {
            definition,
            ctx,
            user_id,
            plans,
            cursor: 0,
            elapsed_ms: 0,
            status: RoutineStatus::NotStarted,
            annotations: Vec::new(),
        })
    }

    pub fn load(
        source: &dyn DefinitionSource,
        routine_id: &RoutineId,
        user_id: UserId,
        ctx: EngineContext,
    ) -> Result<Self> {
        let definition = source
            .routine(routine_id)
            .ok_or_else(|| EngineError::not_found("routine", routine_id))?;
        Self::new(definition, source, user_id, ctx)
    }

    pub fn definition(&self) -> &RoutineDefinition {
        &self.definition
    }

    pub fn status(&self) -> RoutineStatus {
        self.status
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_ms / TICK_MS
    }

    /// Runner of the constituent currently executing.
    pub fn active(&self) -> Option<&SessionRunner> {
        self.plans
            .get(self.cursor)
            .filter(|p| p.status == ConstituentStatus::Running)
            .and_then(|p| p.runner.as_ref())
    }

    pub fn start(&mut self) -> Result<RoutineEvents> {
        if self.status != RoutineStatus::NotStarted {
            return Err(EngineError::invalid_transition(
                "routine",
                "start",
                self.status,
            ));
        }
        self.status = RoutineStatus::Running;
        tracing::info!(
            routine_id = %self.definition.id(),
            user_id = %self.user_id,
            constituents = self.plans.len(),
            "routine started"
        );
        let mut events = RoutineEvents::new();
        self.start_next(&mut events)?;
        Ok(events)
    }

    /// Pump time into the active constituent.
    ///
    /// Every pumped second counts toward the budget, paused or not. Time left
    /// over when a constituent ends is not carried into the next one.
    pub fn tick(&mut self, elapsed: Duration) -> Result<RoutineEvents> {
        let mut events = RoutineEvents::new();
        match self.status {
            RoutineStatus::NotStarted => {
                return Err(EngineError::invalid_transition("routine", "tick", self.status))
            }
            RoutineStatus::Finished | RoutineStatus::Stopped => return Ok(events),
            RoutineStatus::Running => {}
        }
        self.elapsed_ms = self.elapsed_ms.saturating_add(duration_ms(elapsed));
        let index = self.cursor;
        let session_events = self.active_mut("tick")?.tick(elapsed)?;
        Self::wrap(index, session_events, &mut events);
        self.settle(&mut events)?;
        Ok(events)
    }

    /// Abandon the active constituent and move on to the next one.
    pub fn skip_remaining(&mut self) -> Result<RoutineEvents> {
        let index = self.cursor;
        let session_events = self
            .active_mut("skip remaining")?
            .abort(AbandonReason::SkippedByRoutine)?;
        let mut events = RoutineEvents::new();
        Self::wrap(index, session_events, &mut events);
        self.settle(&mut events)?;
        Ok(events)
    }

    /// Abandon the active constituent and cancel everything after it.
    pub fn stop(&mut self) -> Result<RoutineEvents> {
        if self.status != RoutineStatus::Running {
            return Err(EngineError::invalid_transition("routine", "stop", self.status));
        }
        let mut events = RoutineEvents::new();
        let index = self.cursor;
        if let Some(runner) = self.plans.get_mut(index).and_then(|p| p.runner.as_mut()) {
            if !runner.is_terminal() {
                let session_events = runner.abort(AbandonReason::RoutineStopped)?;
                Self::wrap(index, session_events, &mut events);
                self.close_active(&mut events);
            }
        }
        for plan in self.plans.iter_mut().skip(self.cursor) {
            if plan.status == ConstituentStatus::Pending {
                plan.status = ConstituentStatus::Cancelled;
            }
        }
        self.cursor = self.plans.len();
        self.status = RoutineStatus::Stopped;
        tracing::info!(
            routine_id = %self.definition.id(),
            elapsed_seconds = self.elapsed_seconds(),
            "routine stopped"
        );
        events.push(RoutineEvent::Stopped);
        Ok(events)
    }

    pub fn pause(&mut self) -> Result<RoutineEvents> {
        self.forward("pause", SessionRunner::pause)
    }

    pub fn resume(&mut self) -> Result<RoutineEvents> {
        self.forward("resume", SessionRunner::resume)
    }

    pub fn complete_bout(&mut self) -> Result<RoutineEvents> {
        self.forward("complete bout", SessionRunner::complete_bout)
    }

    pub fn skip_element(&mut self) -> Result<RoutineEvents> {
        self.forward("skip element", SessionRunner::skip)
    }

    pub fn record_craving_before(&mut self, value: i32) -> Result<RoutineEvents> {
        self.forward("record craving before", |runner| runner.record_craving_before(value))
    }

    /// Applies to the active constituent, or to the most recent one that ran
    /// once the routine is over.
    pub fn record_craving_after(&mut self, value: i32) -> Result<RoutineEvents> {
        let Some(index) = self.plans.iter().rposition(|p| p.runner.is_some()) else {
            return Err(EngineError::invalid_transition(
                "routine",
                "record craving after",
                self.status,
            ));
        };
        let mut events = RoutineEvents::new();
        if let Some(runner) = self.plans[index].runner.as_mut() {
            let session_events = runner.record_craving_after(value)?;
            Self::wrap(index, session_events, &mut events);
        }
        Ok(events)
    }

    pub fn report(&self) -> RoutineReport {
        RoutineReport {
            routine_id: self.definition.id().clone(),
            status: self.status,
            elapsed_seconds: self.elapsed_seconds(),
            budget_seconds: self.definition.budget_seconds(),
            constituents: self
                .plans
                .iter()
                .enumerate()
                .map(|(index, plan)| ConstituentReport {
                    index,
                    label: plan.label.clone(),
                    session_id: plan.session.definition().id().clone(),
                    nominal_seconds: plan.nominal_seconds,
                    status: plan.status,
                    instance_id: plan.runner.as_ref().map(SessionRunner::instance_id),
                    outcome: plan
                        .runner
                        .as_ref()
                        .and_then(SessionRunner::outcome)
                        .cloned(),
                })
                .collect(),
            annotations: self.annotations.clone(),
        }
    }

    // ============================================================================
    // Internals
    // ============================================================================

    fn forward(
        &mut self,
        action: &'static str,
        op: impl FnOnce(&mut SessionRunner) -> Result<SessionEvents>,
    ) -> Result<RoutineEvents> {
        let index = self.cursor;
        let session_events = op(self.active_mut(action)?)?;
        let mut events = RoutineEvents::new();
        Self::wrap(index, session_events, &mut events);
        self.settle(&mut events)?;
        Ok(events)
    }

    fn active_mut(&mut self, action: &'static str) -> Result<&mut SessionRunner> {
        let status = self.status;
        self.plans
            .get_mut(self.cursor)
            .filter(|p| p.status == ConstituentStatus::Running)
            .and_then(|p| p.runner.as_mut())
            .ok_or_else(|| EngineError::invalid_transition("routine", action, status))
    }

    fn wrap(index: usize, session_events: SessionEvents, events: &mut RoutineEvents) {
        events.extend(
            session_events
                .into_iter()
                .map(|event| RoutineEvent::Session { index, event }),
        );
    }

    /// Close the active constituent if its session ended and start the next.
    fn settle(&mut self, events: &mut RoutineEvents) -> Result<()> {
        let ended = self.active().is_some_and(SessionRunner::is_terminal);
        if ended {
            self.close_active(events);
            self.start_next(events)?;
        }
        Ok(())
    }

    fn close_active(&mut self, events: &mut RoutineEvents) {
        let index = self.cursor;
        let Some(plan) = self.plans.get_mut(index) else {
            return;
        };
        let status = match plan.runner.as_ref().and_then(SessionRunner::status) {
            Some(InstanceStatus::Completed) => ConstituentStatus::Completed,
            _ => ConstituentStatus::Abandoned,
        };
        plan.status = status;
        tracing::debug!(
            routine_id = %self.definition.id(),
            index,
            ?status,
            "constituent ended"
        );
        events.push(RoutineEvent::ConstituentEnded { index, status });
        self.cursor += 1;
    }

    fn start_next(&mut self, events: &mut RoutineEvents) -> Result<()> {
        let budget = self.definition.budget_seconds();
        let allowed = budget.saturating_add(self.ctx.config().routine_budget_slack_seconds);
        let elapsed = self.elapsed_seconds();

        let Some(plan) = self.plans.get_mut(self.cursor) else {
            return self.finish(events);
        };

        if self.cursor > 0 && elapsed.saturating_add(plan.nominal_seconds) > allowed {
            let index = self.cursor;
            events.push(RoutineEvent::BudgetExceeded {
                index,
                elapsed_seconds: elapsed,
                nominal_seconds: plan.nominal_seconds,
                budget_seconds: budget,
            });
            let mut skipped = 0;
            for plan in self.plans.iter_mut().skip(index) {
                plan.status = ConstituentStatus::SkippedForBudget;
                skipped += 1;
            }
            tracing::warn!(
                routine_id = %self.definition.id(),
                elapsed_seconds = elapsed,
                budget_seconds = budget,
                skipped,
                "routine budget exceeded"
            );
            self.annotations.push(Annotation::BudgetExceeded {
                budget_seconds: budget,
                elapsed_seconds: elapsed,
                skipped_constituents: skipped,
            });
            self.cursor = self.plans.len();
            return self.finish(events);
        }

        let mut runner = SessionRunner::new(plan.session.clone(), self.user_id, self.ctx.clone());
        let session_events = runner.start()?;
        let session_id = plan.session.definition().id().clone();
        plan.status = ConstituentStatus::Running;
        plan.runner = Some(runner);

        let index = self.cursor;
        events.push(RoutineEvent::ConstituentStarted { index, session_id });
        Self::wrap(index, session_events, events);
        Ok(())
    }

    fn finish(&mut self, events: &mut RoutineEvents) -> Result<()> {
        self.status = RoutineStatus::Finished;
        tracing::info!(
            routine_id = %self.definition.id(),
            elapsed_seconds = self.elapsed_seconds(),
            "routine finished"
        );
        events.push(RoutineEvent::Finished);
        Ok(())
    }
}
