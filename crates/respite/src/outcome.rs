//! Outcome recorder: turns a terminated instance into an efficacy record.

use serde::{Deserialize, Serialize};

use crate::definition::SessionDefinition;
use crate::error::{EngineError, Result};
use crate::ids::ElementId;
use crate::instance::{Measurements, SessionInstance};

/// Non-fatal notes attached to outcome records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    /// A mandatory element was skipped.
    PolicyViolation {
        #[serde(rename = "elementId")]
        element_id: ElementId,
        order: i64,
    },
    /// A routine ran out of budget and skipped constituents.
    BudgetExceeded {
        #[serde(rename = "budgetSeconds")]
        budget_seconds: u64,
        #[serde(rename = "elapsedSeconds")]
        elapsed_seconds: u64,
        #[serde(rename = "skippedConstituents")]
        skipped_constituents: usize,
    },
}

/// Finalized record of a terminated instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub instance: SessionInstance,
    /// `cravingBefore - cravingAfter`; positive means improvement. Absent when
    /// either rating is missing or the difference does not fit an `i32`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effectiveness_delta: Option<i32>,
    pub annotations: Vec<Annotation>,
    /// Set when the record should be excluded from or annotated in aggregate
    /// efficacy reporting.
    pub flagged: bool,
}

impl SessionOutcome {
    pub fn policy_violations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations
            .iter()
            .filter(|a| matches!(a, Annotation::PolicyViolation { .. }))
    }
}

/// Computes [`SessionOutcome`]s. Pure; persistence is the caller's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeRecorder;

impl OutcomeRecorder {
    pub fn effectiveness_delta(measurements: &Measurements) -> Option<i32> {
        match (measurements.craving_before, measurements.craving_after) {
            (Some(before), Some(after)) => before.checked_sub(after),
            _ => None,
        }
    }

    /// Build the outcome for a terminated instance.
    ///
    /// Policy violations are derived from the snapshot itself (skipped elements
    /// that are not optional in `definition`), so a recovered instance produces
    /// the same annotations as the original run.
    pub fn finalize(
        instance: &SessionInstance,
        definition: &SessionDefinition,
    ) -> Result<SessionOutcome> {
        if !instance.is_terminal() {
            return Err(EngineError::invalid_transition(
                "outcome",
                "finalize",
                instance.status,
            ));
        }

        let annotations: Vec<Annotation> = instance
            .skipped_elements
            .iter()
            .filter_map(|id| definition.find(id))
            .filter(|element| !element.is_optional)
            .map(|element| Annotation::PolicyViolation {
                element_id: element.id.clone(),
                order: element.order,
            })
            .collect();

        let effectiveness_delta = Self::effectiveness_delta(&instance.measurements);
        let flagged = !annotations.is_empty();

        tracing::info!(
            instance_id = %instance.id,
            status = %instance.status,
            ?effectiveness_delta,
            flagged,
            "session outcome recorded"
        );

        Ok(SessionOutcome {
            instance: instance.clone(),
            effectiveness_delta,
            annotations,
            flagged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ElementDefinition;
    use crate::ids::{InstanceId, SessionId, UserId};
    use crate::instance::AbandonReason;
    use chrono::Utc;

    fn definition() -> SessionDefinition {
        SessionDefinition::new(
            "calm",
            None,
            vec![
                ElementDefinition::timed("settle", 1, 30),
                ElementDefinition::timed("notice", 2, 30).optional(),
            ],
        )
        .unwrap()
    }

    fn terminated(before: Option<i32>, after: Option<i32>) -> SessionInstance {
        let instance = SessionInstance::begin(
            InstanceId::new(),
            UserId::new(),
            SessionId::new("calm"),
            Measurements {
                craving_before: before,
                craving_after: after,
                ..Measurements::default()
            },
            Utc::now(),
        );
        instance.completed(Utc::now())
    }

    #[test]
    fn test_delta_is_before_minus_after() {
        let outcome = OutcomeRecorder::finalize(&terminated(Some(8), Some(3)), &definition()).unwrap();
        assert_eq!(outcome.effectiveness_delta, Some(5));

        let worse = OutcomeRecorder::finalize(&terminated(Some(2), Some(6)), &definition()).unwrap();
        assert_eq!(worse.effectiveness_delta, Some(-4));
    }

    #[test]
    fn test_delta_outside_i32_is_absent() {
        let measurements = Measurements {
            craving_before: Some(i32::MAX),
            craving_after: Some(-1),
            ..Measurements::default()
        };
        assert_eq!(OutcomeRecorder::effectiveness_delta(&measurements), None);
    }

    #[test]
    fn test_missing_after_rating_leaves_delta_absent() {
        let outcome = OutcomeRecorder::finalize(&terminated(Some(8), None), &definition()).unwrap();
        assert_eq!(outcome.effectiveness_delta, None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("effectivenessDelta").is_none());
    }

    #[test]
    fn test_skipped_mandatory_element_is_flagged() {
        let instance = terminated(None, None);
        let instance = SessionInstance {
            skipped_elements: vec![ElementId::new("settle"), ElementId::new("notice")],
            ..instance
        };
        let outcome = OutcomeRecorder::finalize(&instance, &definition()).unwrap();
        assert!(outcome.flagged);
        assert_eq!(
            outcome.annotations,
            vec![Annotation::PolicyViolation {
                element_id: ElementId::new("settle"),
                order: 1
            }]
        );
    }

    #[test]
    fn test_live_instance_cannot_be_finalized() {
        let live = SessionInstance::begin(
            InstanceId::new(),
            UserId::new(),
            SessionId::new("calm"),
            Measurements::default(),
            Utc::now(),
        );
        assert!(OutcomeRecorder::finalize(&live, &definition()).is_err());
        let abandoned = live.abandoned(AbandonReason::UserStopped, Utc::now());
        assert!(OutcomeRecorder::finalize(&abandoned, &definition()).is_ok());
    }
}
