//! Ready-made definitions and contexts.

use respite_core::{
    Catalog, CatalogDocument, EngineConfig, EngineContext, Phase, ProtocolDefinition, UserId,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{ManualClock, RecordingSink};

/// Square breathing: inhale, hold, exhale, hold at 4s each, four cycles.
pub fn square_breathing() -> ProtocolDefinition {
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
    .with_name("Square breathing")
}

/// Deterministic user id, handy for asserting on snapshots.
pub fn user(n: u128) -> UserId {
    UserId::from_uuid(Uuid::from_u128(n))
}

/// Catalog document covering every element kind.
///
/// - `square` protocol (64s)
/// - `calm`: square breathing only
/// - `four-step`: four 10s timed elements `e0`..`e3`, `e2` optional
/// - `workout`: 3 push-up bouts with 5s rests, then an optional 20s stretch
/// - `sos` routine: `calm` then `four-step`, budget 300s
/// - `tight` routine: three 120s timed constituents, budget 300s
pub fn catalog_document() -> serde_json::Value {
    json!({
        "protocols": [{
            "id": "square",
            "name": "Square breathing",
            "cycles": 4,
            "phases": [
                {"name": "inhale", "duration": 4},
                {"name": "hold", "duration": 4},
                {"name": "exhale", "duration": 4},
                {"name": "hold", "duration": 4}
            ]
        }],
        "sessions": [
            {"id": "calm", "title": "Calm down", "elements": [
                {"elementId": "breathe", "order": 1, "kind": "breathing", "protocolRef": "square"}
            ]},
            {"id": "four-step", "elements": [
                {"elementId": "e0", "order": 1, "kind": "timed", "duration": 10},
                {"elementId": "e1", "order": 2, "kind": "timed", "duration": 10},
                {"elementId": "e2", "order": 3, "kind": "timed", "duration": 10, "isOptional": true},
                {"elementId": "e3", "order": 4, "kind": "timed", "duration": 10}
            ]},
            {"id": "workout", "elements": [
                {"elementId": "pushups", "order": 1, "kind": "repetition", "repetitions": 3, "rest": 5},
                {"elementId": "stretch", "order": 2, "kind": "timed", "duration": 20, "isOptional": true}
            ]}
        ],
        "routines": [
            {"id": "sos", "name": "Craving SOS", "totalDuration": 300, "constituents": [
                {"sessionId": "calm"},
                {"sessionId": "four-step"}
            ]},
            {"id": "tight", "totalDuration": 300, "constituents": [
                {"label": "first", "elements": [{"elementId": "a", "order": 1, "kind": "timed", "duration": 2, "durationUnit": "minutes"}]},
                {"label": "second", "elements": [{"elementId": "b", "order": 1, "kind": "timed", "duration": 120}]},
                {"label": "third", "elements": [{"elementId": "c", "order": 1, "kind": "timed", "duration": 120}]}
            ]}
        ]
    })
}

pub fn catalog() -> Catalog {
    let document: CatalogDocument = serde_json::from_value(catalog_document()).unwrap();
    Catalog::from_document(document, &EngineConfig::default()).unwrap()
}

/// Engine context wired to a manual clock and a recording sink.
pub struct TestContext {
    pub ctx: EngineContext,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::epoch());
        let sink = Arc::new(RecordingSink::new());
        let ctx = EngineContext::new(config)
            .with_clock(clock.clone())
            .with_sink(sink.clone());
        Self { ctx, clock, sink }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
