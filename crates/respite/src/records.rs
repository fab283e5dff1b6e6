//! Store record shapes and the loading boundary.
//!
//! Records are what the surrounding application keeps in its relational store
//! (camelCase JSON, loosely typed, durations in seconds or minutes). Converting a
//! record normalizes units and validates it; nothing malformed gets past here.

use serde::{Deserialize, Serialize};

use crate::config::{DurationUnit, EngineConfig};
use crate::definition::{
    Constituent, ElementDefinition, ElementKind, Phase, ProtocolDefinition, RoutineDefinition,
    SessionDefinition,
};
use crate::error::{DefinitionIssue, EngineError, Result};
use crate::ids::{ProtocolId, SessionId};

// ============================================================================
// Record shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub name: String,
    #[serde(alias = "durationSeconds")]
    pub duration: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub phases: Vec<PhaseRecord>,
    pub cycles: i64,
    #[serde(default)]
    pub duration_unit: Option<DurationUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    #[serde(alias = "id")]
    pub element_id: String,
    pub order: i64,
    pub kind: String,
    #[serde(default)]
    pub protocol_ref: Option<String>,
    #[serde(default, alias = "durationSeconds")]
    pub duration: Option<i64>,
    #[serde(default)]
    pub repetitions: Option<i64>,
    #[serde(default, alias = "restSeconds")]
    pub rest: Option<i64>,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub duration_unit: Option<DurationUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub elements: Vec<ElementRecord>,
    #[serde(default)]
    pub duration_unit: Option<DurationUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstituentRecord {
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Elements {
        #[serde(default)]
        label: Option<String>,
        elements: Vec<ElementRecord>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub constituents: Vec<ConstituentRecord>,
    #[serde(alias = "totalDurationBudget")]
    pub total_duration: i64,
    #[serde(default)]
    pub duration_unit: Option<DurationUnit>,
}

// ============================================================================
// Conversion
// ============================================================================

fn positive_seconds(
    value: i64,
    unit: DurationUnit,
    non_positive: impl FnOnce() -> DefinitionIssue,
) -> std::result::Result<u64, DefinitionIssue> {
    if value <= 0 {
        return Err(non_positive());
    }
    // value > 0 so the cast is lossless
    let value = value as u64;
    unit.to_seconds(value)
        .ok_or(DefinitionIssue::DurationOverflow {
            value,
            unit: unit.as_str(),
        })
}

fn narrow(seconds: u64, unit: DurationUnit) -> std::result::Result<u32, DefinitionIssue> {
    u32::try_from(seconds).map_err(|_| DefinitionIssue::DurationOverflow {
        value: seconds,
        unit: unit.as_str(),
    })
}

impl ProtocolRecord {
    pub fn into_definition(self, config: &EngineConfig) -> Result<ProtocolDefinition> {
        let unit = self.duration_unit.unwrap_or(config.default_duration_unit);
        let id = self.id;
        let fail = |issue| EngineError::invalid_definition(&id, issue);

        let phases = self
            .phases
            .into_iter()
            .map(|phase| {
                let name = phase.name;
                let seconds = positive_seconds(phase.duration, unit, || {
                    DefinitionIssue::NonPositivePhase { phase: name.clone() }
                })
                .and_then(|s| narrow(s, unit))
                .map_err(fail)?;
                Ok(Phase::new(name, seconds))
            })
            .collect::<Result<Vec<_>>>()?;

        let cycles = u32::try_from(self.cycles)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| fail(DefinitionIssue::NoCycles))?;

        let protocol = ProtocolDefinition::new(ProtocolId::new(id.clone()), phases, cycles)?;
        Ok(match self.name {
            Some(name) => protocol.with_name(name),
            None => protocol,
        })
    }
}

impl ElementRecord {
    fn into_definition(self, fallback_unit: DurationUnit) -> std::result::Result<ElementDefinition, DefinitionIssue> {
        let unit = self.duration_unit.unwrap_or(fallback_unit);
        let element = self.element_id.clone();
        let missing = |field| DefinitionIssue::MissingField {
            element: element.clone(),
            field,
        };
        let non_positive = |field| DefinitionIssue::NonPositiveField {
            element: element.clone(),
            field,
        };

        let kind = match self.kind.to_ascii_lowercase().as_str() {
            "breathing" => ElementKind::Breathing {
                protocol: ProtocolId::new(self.protocol_ref.ok_or_else(|| missing("protocolRef"))?),
            },
            "timed" => {
                let raw = self.duration.ok_or_else(|| missing("durationSeconds"))?;
                let seconds = positive_seconds(raw, unit, || non_positive("durationSeconds"))?;
                ElementKind::Timed {
                    duration_seconds: narrow(seconds, unit)?,
                }
            }
            "repetition" => {
                let repetitions = self
                    .repetitions
                    .ok_or_else(|| missing("repetitions"))
                    .and_then(|r| u32::try_from(r).map_err(|_| non_positive("repetitions")))?;
                if repetitions == 0 {
                    return Err(non_positive("repetitions"));
                }
                let rest = match self.rest {
                    None | Some(0) => 0,
                    Some(raw) if raw < 0 => return Err(non_positive("restSeconds")),
                    Some(raw) => narrow(positive_seconds(raw, unit, || non_positive("restSeconds"))?, unit)?,
                };
                ElementKind::Repetition {
                    repetitions,
                    rest_seconds: rest,
                }
            }
            other => {
                return Err(DefinitionIssue::UnknownKind {
                    element,
                    kind: other.to_string(),
                })
            }
        };

        Ok(ElementDefinition {
            id: self.element_id.into(),
            order: self.order,
            kind,
            is_optional: self.is_optional,
        })
    }
}

fn convert_elements(
    owner: &str,
    records: Vec<ElementRecord>,
    unit: DurationUnit,
) -> Result<Vec<ElementDefinition>> {
    records
        .into_iter()
        .map(|r| {
            r.into_definition(unit)
                .map_err(|issue| EngineError::invalid_definition(owner, issue))
        })
        .collect()
}

impl SessionRecord {
    pub fn into_definition(self, config: &EngineConfig) -> Result<SessionDefinition> {
        let unit = self.duration_unit.unwrap_or(config.default_duration_unit);
        let elements = convert_elements(&self.id, self.elements, unit)?;
        SessionDefinition::new(SessionId::new(self.id), self.title, elements)
    }
}

impl RoutineRecord {
    pub fn into_definition(self, config: &EngineConfig) -> Result<RoutineDefinition> {
        let unit = self.duration_unit.unwrap_or(config.default_duration_unit);
        let id = self.id;

        let budget = positive_seconds(self.total_duration, unit, || DefinitionIssue::NoBudget)
            .map_err(|issue| EngineError::invalid_definition(&id, issue))?;

        let constituents = self
            .constituents
            .into_iter()
            .enumerate()
            .map(|(index, record)| match record {
                ConstituentRecord::Session { session_id } => {
                    Ok(Constituent::Session(SessionId::new(session_id)))
                }
                ConstituentRecord::Elements { label, elements } => {
                    let synthetic = format!("{id}#{index}");
                    let elements = convert_elements(&synthetic, elements, unit)?;
                    Ok(Constituent::Elements {
                        label,
                        session: SessionDefinition::new(synthetic, None, elements)?,
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        RoutineDefinition::new(id, self.name, constituents, budget)
    }
}
