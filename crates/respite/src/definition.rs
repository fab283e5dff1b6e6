//! Validated, immutable definitions the engine executes.
//!
//! Everything here has passed the loading boundary: durations are whole
//! seconds, lists are non-empty and session elements are sorted by `order`.
//! Raw store records live in [`crate::records`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{DefinitionIssue, EngineError, Result};
use crate::ids::{ElementId, ProtocolId, RoutineId, SessionId};

// ============================================================================
// Breathing protocols
// ============================================================================

/// One named, timed segment of a breathing protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    pub duration_seconds: u32,
}

impl Phase {
    pub fn new(name: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            name: name.into(),
            duration_seconds,
        }
    }
}

/// A cyclic list of phases repeated `cycles` times.
///
/// # Invariants
///
/// - at least one phase, every phase positive and named
/// - `cycles >= 1`
/// - total duration is `cycles * sum(phase durations)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolDefinition {
    pub id: ProtocolId,
    #[serde(default)]
    pub name: Option<String>,
    pub phases: Vec<Phase>,
    pub cycles: u32,
}

impl ProtocolDefinition {
    /// Build and validate a protocol.
    pub fn new(id: impl Into<ProtocolId>, phases: Vec<Phase>, cycles: u32) -> Result<Self> {
        let protocol = Self {
            id: id.into(),
            name: None,
            phases,
            cycles,
        };
        protocol.validate()?;
        Ok(protocol)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |issue| Err(EngineError::invalid_definition(&self.id, issue));

        if self.phases.is_empty() {
            return fail(DefinitionIssue::NoPhases);
        }
        if self.cycles == 0 {
            return fail(DefinitionIssue::NoCycles);
        }
        for (index, phase) in self.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return fail(DefinitionIssue::EmptyPhaseName { index });
            }
            if phase.duration_seconds == 0 {
                return fail(DefinitionIssue::NonPositivePhase {
                    phase: phase.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Length of one full traversal of the phases.
    pub fn cycle_seconds(&self) -> u64 {
        self.phases
            .iter()
            .map(|p| u64::from(p.duration_seconds))
            .fold(0, u64::saturating_add)
    }

    /// Total running time, computed without executing anything.
    pub fn total_seconds(&self) -> u64 {
        self.cycle_seconds().saturating_mul(u64::from(self.cycles))
    }

    /// Number of phase completions in a full run.
    pub fn phase_completions(&self) -> u64 {
        self.phases.len() as u64 * u64::from(self.cycles)
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// What an element does when played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementKind {
    /// Run a breathing protocol to completion.
    Breathing { protocol: ProtocolId },
    /// A single countdown.
    Timed {
        #[serde(rename = "durationSeconds")]
        duration_seconds: u32,
    },
    /// Caller-confirmed work bouts separated by rest countdowns.
    Repetition {
        repetitions: u32,
        #[serde(rename = "restSeconds")]
        rest_seconds: u32,
    },
}

impl ElementKind {
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Breathing { .. } => "breathing",
            ElementKind::Timed { .. } => "timed",
            ElementKind::Repetition { .. } => "repetition",
        }
    }
}

/// One ordered unit of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    pub id: ElementId,
    pub order: i64,
    #[serde(flatten)]
    pub kind: ElementKind,
    #[serde(default)]
    pub is_optional: bool,
}

impl ElementDefinition {
    pub fn breathing(id: impl Into<ElementId>, order: i64, protocol: impl Into<ProtocolId>) -> Self {
        Self {
            id: id.into(),
            order,
            kind: ElementKind::Breathing {
                protocol: protocol.into(),
            },
            is_optional: false,
        }
    }

    pub fn timed(id: impl Into<ElementId>, order: i64, duration_seconds: u32) -> Self {
        Self {
            id: id.into(),
            order,
            kind: ElementKind::Timed { duration_seconds },
            is_optional: false,
        }
    }

    pub fn repetition(
        id: impl Into<ElementId>,
        order: i64,
        repetitions: u32,
        rest_seconds: u32,
    ) -> Self {
        Self {
            id: id.into(),
            order,
            kind: ElementKind::Repetition {
                repetitions,
                rest_seconds,
            },
            is_optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    fn validate(&self) -> std::result::Result<(), DefinitionIssue> {
        let element = || self.id.to_string();
        match &self.kind {
            ElementKind::Breathing { .. } => Ok(()),
            ElementKind::Timed { duration_seconds } if *duration_seconds == 0 => {
                Err(DefinitionIssue::NonPositiveField {
                    element: element(),
                    field: "durationSeconds",
                })
            }
            ElementKind::Repetition { repetitions, .. } if *repetitions == 0 => {
                Err(DefinitionIssue::NonPositiveField {
                    element: element(),
                    field: "repetitions",
                })
            }
            _ => Ok(()),
        }
    }
}

/// An ordered list of elements presented as one guided exercise.
///
/// # Invariants
///
/// - at least one element
/// - element ids and `order` values are unique
/// - `elements()` is sorted by `order`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDefinition {
    id: SessionId,
    title: Option<String>,
    elements: Vec<ElementDefinition>,
}

impl SessionDefinition {
    /// Validate the elements and fix their execution order.
    pub fn new(
        id: impl Into<SessionId>,
        title: Option<String>,
        mut elements: Vec<ElementDefinition>,
    ) -> Result<Self> {
        let id = id.into();
        let fail = |issue| Err(EngineError::invalid_definition(&id, issue));

        if elements.is_empty() {
            return fail(DefinitionIssue::NoElements);
        }

        let mut orders = HashSet::new();
        let mut ids = HashSet::new();
        for element in &elements {
            if !orders.insert(element.order) {
                return fail(DefinitionIssue::DuplicateOrder {
                    order: element.order,
                });
            }
            if !ids.insert(element.id.clone()) {
                return fail(DefinitionIssue::DuplicateElement {
                    element: element.id.to_string(),
                });
            }
            if let Err(issue) = element.validate() {
                return fail(issue);
            }
        }

        elements.sort_by_key(|e| e.order);
        Ok(Self {
            id,
            title,
            elements,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn elements(&self) -> &[ElementDefinition] {
        &self.elements
    }

    pub fn element(&self, index: usize) -> Option<&ElementDefinition> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn find(&self, id: &ElementId) -> Option<&ElementDefinition> {
        self.elements.iter().find(|e| &e.id == id)
    }

    /// Protocols referenced by breathing elements, in element order.
    pub fn protocol_refs(&self) -> impl Iterator<Item = (&ElementId, &ProtocolId)> {
        self.elements.iter().filter_map(|e| match &e.kind {
            ElementKind::Breathing { protocol } => Some((&e.id, protocol)),
            _ => None,
        })
    }
}

// ============================================================================
// Routines
// ============================================================================

/// One step of an emergency routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constituent {
    /// Run a stored session definition.
    Session(SessionId),
    /// Run an ad-hoc, already validated element list.
    Elements {
        label: Option<String>,
        session: SessionDefinition,
    },
}

impl Constituent {
    pub fn label(&self) -> String {
        match self {
            Constituent::Session(id) => id.to_string(),
            Constituent::Elements { label, session } => label
                .clone()
                .unwrap_or_else(|| session.id().to_string()),
        }
    }
}

/// A composition of sessions bounded by a total time budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineDefinition {
    id: RoutineId,
    name: Option<String>,
    constituents: Vec<Constituent>,
    total_duration_budget_seconds: u64,
}

impl RoutineDefinition {
    pub fn new(
        id: impl Into<RoutineId>,
        name: Option<String>,
        constituents: Vec<Constituent>,
        total_duration_budget_seconds: u64,
    ) -> Result<Self> {
        let id = id.into();
        if constituents.is_empty() {
            return Err(EngineError::invalid_definition(
                &id,
                DefinitionIssue::NoConstituents,
            ));
        }
        if total_duration_budget_seconds == 0 {
            return Err(EngineError::invalid_definition(&id, DefinitionIssue::NoBudget));
        }
        Ok(Self {
            id,
            name,
            constituents,
            total_duration_budget_seconds,
        })
    }

    pub fn id(&self) -> &RoutineId {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn constituents(&self) -> &[Constituent] {
        &self.constituents
    }

    pub fn budget_seconds(&self) -> u64 {
        self.total_duration_budget_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> ProtocolDefinition {
        ProtocolDefinition::new(
            "square",
            vec![
                Phase::new("inhale", 4),
                Phase::new("hold", 4),
                Phase::new("exhale", 4),
                Phase::new("hold", 4),
            ],
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_protocol_total_is_cycles_times_phase_sum() {
        let protocol = square();
        assert_eq!(protocol.cycle_seconds(), 16);
        assert_eq!(protocol.total_seconds(), 64);
        assert_eq!(protocol.phase_completions(), 16);
    }

    #[test]
    fn test_protocol_rejects_zero_duration_phase() {
        let err = ProtocolDefinition::new("bad", vec![Phase::new("inhale", 0)], 1).unwrap_err();
        assert_eq!(
            err,
            EngineError::invalid_definition(
                "bad",
                DefinitionIssue::NonPositivePhase {
                    phase: "inhale".into()
                }
            )
        );
    }

    #[test]
    fn test_protocol_rejects_empty_and_zero_cycles() {
        assert!(ProtocolDefinition::new("p", vec![], 1).is_err());
        assert!(ProtocolDefinition::new("p", vec![Phase::new("in", 1)], 0).is_err());
    }

    #[test]
    fn test_session_sorts_by_order() {
        let session = SessionDefinition::new(
            "s",
            None,
            vec![
                ElementDefinition::timed("b", 20, 30),
                ElementDefinition::timed("a", 10, 30),
            ],
        )
        .unwrap();
        let ids: Vec<_> = session.elements().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_session_rejects_duplicate_order() {
        let err = SessionDefinition::new(
            "s",
            None,
            vec![
                ElementDefinition::timed("a", 1, 30),
                ElementDefinition::timed("b", 1, 30),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidProtocol {
                issue: DefinitionIssue::DuplicateOrder { order: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_session_rejects_zero_repetitions() {
        let err = SessionDefinition::new(
            "s",
            None,
            vec![ElementDefinition::repetition("squats", 1, 0, 10)],
        )
        .unwrap_err();
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_element_kind_serializes_as_tagged_record() {
        let element = ElementDefinition::repetition("squats", 3, 5, 15).optional();
        let json = serde_json::to_value(&element).unwrap();
        assert_eq!(json["kind"], "repetition");
        assert_eq!(json["restSeconds"], 15);
        assert_eq!(json["isOptional"], true);
    }

    #[test]
    fn test_routine_requires_budget() {
        let err = RoutineDefinition::new(
            "sos",
            None,
            vec![Constituent::Session(SessionId::new("calm"))],
            0,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidProtocol {
                issue: DefinitionIssue::NoBudget,
                ..
            }
        ));
    }
}
