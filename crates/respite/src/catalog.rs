//! Read-only definition lookup.
//!
//! The engine never authors content. It resolves definitions by id through a
//! [`DefinitionSource`], which the surrounding application backs with its record
//! store. [`Catalog`] is the in-memory implementation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::definition::{
    Constituent, ElementDefinition, ElementKind, ProtocolDefinition, RoutineDefinition,
    SessionDefinition,
};
use crate::error::{DefinitionIssue, EngineError, Result};
use crate::ids::{ProtocolId, RoutineId, SessionId};
use crate::records::{ProtocolRecord, RoutineRecord, SessionRecord};

/// Lookup of authored definitions by id.
pub trait DefinitionSource: Send + Sync {
    fn protocol(&self, id: &ProtocolId) -> Option<Arc<ProtocolDefinition>>;

    fn session(&self, id: &SessionId) -> Option<Arc<SessionDefinition>>;

    fn routine(&self, id: &RoutineId) -> Option<Arc<RoutineDefinition>>;
}

/// A full content export as records, e.g. read from a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogDocument {
    pub protocols: Vec<ProtocolRecord>,
    pub sessions: Vec<SessionRecord>,
    pub routines: Vec<RoutineRecord>,
}

/// In-memory [`DefinitionSource`].
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    protocols: HashMap<ProtocolId, Arc<ProtocolDefinition>>,
    sessions: HashMap<SessionId, Arc<SessionDefinition>>,
    routines: HashMap<RoutineId, Arc<RoutineDefinition>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert and cross-check every record of a document.
    ///
    /// Sessions must only reference protocols in the document and routines must
    /// only reference sessions in it.
    pub fn from_document(document: CatalogDocument, config: &EngineConfig) -> Result<Self> {
        let mut catalog = Self::new();
        for record in document.protocols {
            catalog.insert_protocol(record.into_definition(config)?)?;
        }
        for record in document.sessions {
            let session = record.into_definition(config)?;
            ResolvedSession::resolve(&catalog, Arc::new(session.clone()))?;
            catalog.insert_session(session);
        }
        for record in document.routines {
            let routine = record.into_definition(config)?;
            for constituent in routine.constituents() {
                match constituent {
                    Constituent::Session(id) if catalog.session(id).is_none() => {
                        return Err(EngineError::invalid_definition(
                            routine.id(),
                            DefinitionIssue::UnknownSession {
                                session: id.to_string(),
                            },
                        ));
                    }
                    Constituent::Elements { session, .. } => {
                        ResolvedSession::resolve(&catalog, Arc::new(session.clone()))?;
                    }
                    Constituent::Session(_) => {}
                }
            }
            catalog.insert_routine(routine);
        }
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str, config: &EngineConfig) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(raw).map_err(|e| {
            EngineError::invalid_definition(
                "catalog",
                DefinitionIssue::Malformed {
                    message: e.to_string(),
                },
            )
        })?;
        Self::from_document(document, config)
    }

    pub fn insert_protocol(&mut self, protocol: ProtocolDefinition) -> Result<()> {
        protocol.validate()?;
        self.protocols
            .insert(protocol.id.clone(), Arc::new(protocol));
        Ok(())
    }

    pub fn insert_session(&mut self, session: SessionDefinition) {
        self.sessions.insert(session.id().clone(), Arc::new(session));
    }

    pub fn insert_routine(&mut self, routine: RoutineDefinition) {
        self.routines.insert(routine.id().clone(), Arc::new(routine));
    }

    pub fn protocol_count(&self) -> usize {
        self.protocols.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl DefinitionSource for Catalog {
    fn protocol(&self, id: &ProtocolId) -> Option<Arc<ProtocolDefinition>> {
        self.protocols.get(id).cloned()
    }

    fn session(&self, id: &SessionId) -> Option<Arc<SessionDefinition>> {
        self.sessions.get(id).cloned()
    }

    fn routine(&self, id: &RoutineId) -> Option<Arc<RoutineDefinition>> {
        self.routines.get(id).cloned()
    }
}

/// A session definition with every protocol it references loaded.
///
/// Resolution happens before a run starts, so a dangling protocol reference is
/// reported as a definition error rather than discovered mid-session.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    definition: Arc<SessionDefinition>,
    protocols: HashMap<ProtocolId, Arc<ProtocolDefinition>>,
}

impl ResolvedSession {
    /// Look a session up by id and resolve it.
    pub fn load(source: &dyn DefinitionSource, id: &SessionId) -> Result<Self> {
        let definition = source
            .session(id)
            .ok_or_else(|| EngineError::not_found("session", id))?;
        Self::resolve(source, definition)
    }

    pub fn resolve(source: &dyn DefinitionSource, definition: Arc<SessionDefinition>) -> Result<Self> {
        let mut protocols = HashMap::new();
        for (element, protocol_id) in definition.protocol_refs() {
            if protocols.contains_key(protocol_id) {
                continue;
            }
            let protocol = source.protocol(protocol_id).ok_or_else(|| {
                EngineError::invalid_definition(
                    definition.id(),
                    DefinitionIssue::UnknownProtocol {
                        element: element.to_string(),
                        protocol: protocol_id.to_string(),
                    },
                )
            })?;
            protocol.validate()?;
            protocols.insert(protocol_id.clone(), protocol);
        }
        Ok(Self {
            definition,
            protocols,
        })
    }

    pub fn definition(&self) -> &Arc<SessionDefinition> {
        &self.definition
    }

    pub fn protocol(&self, id: &ProtocolId) -> Option<&Arc<ProtocolDefinition>> {
        self.protocols.get(id)
    }

    /// Expected running time of one element.
    ///
    /// Repetition work bouts are open-ended, so they are estimated with
    /// `assumed_bout_seconds`.
    pub fn element_nominal_seconds(&self, element: &ElementDefinition, config: &EngineConfig) -> u64 {
        match &element.kind {
            ElementKind::Breathing { protocol } => self
                .protocols
                .get(protocol)
                .map(|p| p.total_seconds())
                .unwrap_or_default(),
            ElementKind::Timed { duration_seconds } => u64::from(*duration_seconds),
            ElementKind::Repetition {
                repetitions,
                rest_seconds,
            } => {
                let reps = u64::from(*repetitions);
                let work = reps.saturating_mul(config.assumed_bout_seconds);
                let rest = reps.saturating_sub(1).saturating_mul(u64::from(*rest_seconds));
                work.saturating_add(rest)
            }
        }
    }

    /// Expected running time of the whole session.
    pub fn nominal_seconds(&self, config: &EngineConfig) -> u64 {
        self.definition
            .elements()
            .iter()
            .map(|e| self.element_nominal_seconds(e, config))
            .fold(0, u64::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Phase;
    use serde_json::json;

    fn catalog_with_box() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .insert_protocol(
                ProtocolDefinition::new(
                    "box",
                    vec![
                        Phase::new("inhale", 4),
                        Phase::new("hold", 4),
                        Phase::new("exhale", 4),
                        Phase::new("hold", 4),
                    ],
                    2,
                )
                .unwrap(),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_resolve_rejects_dangling_protocol() {
        let catalog = Catalog::new();
        let session = SessionDefinition::new(
            "s",
            None,
            vec![ElementDefinition::breathing("b", 1, "missing")],
        )
        .unwrap();
        let err = ResolvedSession::resolve(&catalog, Arc::new(session)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidProtocol {
                issue: DefinitionIssue::UnknownProtocol { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_nominal_seconds_sums_elements() {
        let catalog = catalog_with_box();
        let session = SessionDefinition::new(
            "s",
            None,
            vec![
                ElementDefinition::breathing("b", 1, "box"),
                ElementDefinition::timed("t", 2, 45),
                ElementDefinition::repetition("r", 3, 3, 10),
            ],
        )
        .unwrap();
        let resolved = ResolvedSession::resolve(&catalog, Arc::new(session)).unwrap();
        let config = EngineConfig {
            assumed_bout_seconds: 5,
            ..EngineConfig::default()
        };
        // 32 breathing + 45 timed + (3 * 5 + 2 * 10) repetition
        assert_eq!(resolved.nominal_seconds(&config), 32 + 45 + 35);
    }

    #[test]
    fn test_nominal_seconds_saturates() {
        let catalog = catalog_with_box();
        let session = SessionDefinition::new(
            "s",
            None,
            vec![
                ElementDefinition::timed("t", 1, 45),
                ElementDefinition::repetition("r", 2, 3, 10),
            ],
        )
        .unwrap();
        let resolved = ResolvedSession::resolve(&catalog, Arc::new(session)).unwrap();
        let config = EngineConfig {
            assumed_bout_seconds: u64::MAX,
            ..EngineConfig::default()
        };
        assert_eq!(resolved.nominal_seconds(&config), u64::MAX);
    }

    #[test]
    fn test_load_reports_missing_session() {
        let err = ResolvedSession::load(&Catalog::new(), &SessionId::new("nope")).unwrap_err();
        assert_eq!(err, EngineError::not_found("session", "nope"));
    }

    #[test]
    fn test_document_checks_routine_references() {
        let raw = json!({
            "protocols": [],
            "sessions": [],
            "routines": [{"id": "sos", "totalDuration": 300, "constituents": [{"sessionId": "ghost"}]}]
        })
        .to_string();
        let err = Catalog::from_json_str(&raw, &EngineConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidProtocol {
                issue: DefinitionIssue::UnknownSession { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_document_loads_linked_content() {
        let raw = json!({
            "protocols": [{"id": "box", "cycles": 4, "phases": [
                {"name": "inhale", "duration": 4}, {"name": "hold", "duration": 4},
                {"name": "exhale", "duration": 4}, {"name": "hold", "duration": 4}
            ]}],
            "sessions": [{"id": "calm", "elements": [
                {"elementId": "breathe", "order": 1, "kind": "breathing", "protocolRef": "box"}
            ]}],
            "routines": [{"id": "sos", "totalDuration": 300, "constituents": [{"sessionId": "calm"}]}]
        })
        .to_string();
        let catalog = Catalog::from_json_str(&raw, &EngineConfig::default()).unwrap();
        assert_eq!(catalog.protocol_count(), 1);
        assert_eq!(catalog.session_count(), 1);
        assert!(catalog.routine(&RoutineId::new("sos")).is_some());
    }
}
