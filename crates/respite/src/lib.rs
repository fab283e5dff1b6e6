//! # Respite
//!
//! A tick-driven execution engine for guided breathing and exercise sessions,
//! with outcome tracking for craving interventions.
//!
//! ## Core Concepts
//!
//! Respite separates **definitions** from **runs**:
//! - [`ProtocolDefinition`], [`SessionDefinition`], [`RoutineDefinition`] = authored content, immutable
//! - [`SessionInstance`] = one user's attempt at a session, a new snapshot per transition
//!
//! The engine owns no timer. The host pumps elapsed time with `tick(elapsed)`
//! and reads back events; wall timestamps come from an injected [`WallClock`].
//!
//! ## Architecture
//!
//! ```text
//! Host (API / UI frame loop)
//!     │
//!     ▼ tick(dt)
//! RoutineRunner ─────► SessionRunner ─────► ElementPlayer ─────► PhaseSequencer
//!  (budget)             (instance             (breathing │          (phases ×
//!                        lifecycle)            timed │ reps)        cycles)
//!                           │
//!                           ├─► OutcomeRecorder  (on terminal status)
//!                           │
//!                           └─► SnapshotSink ───► persistence (fire-and-forget)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One element at a time** - A runner never has two live players
//! 2. **One terminal event** - Every element ends completed, skipped or aborted, once
//! 3. **Snapshots are values** - The runner never hands out its instance mutably
//! 4. **Terminal is final** - `advance()` after completion or abandonment is a no-op
//! 5. **Skips are recorded, not refused** - Mandatory skips become policy violations
//!
//! ## Example
//!
//! ```ignore
//! use respite_core::{Catalog, EngineConfig, EngineContext, SessionId, SessionRunner, UserId};
//! use std::time::Duration;
//!
//! let config = EngineConfig::default();
//! let catalog = Catalog::from_json_str(include_str!("catalog.json"), &config)?;
//! let ctx = EngineContext::new(config);
//!
//! let mut runner = SessionRunner::load(&catalog, &SessionId::new("calm"), UserId::new(), ctx)?;
//! runner.record_craving_before(8)?;
//! runner.start()?;
//!
//! // Called from the host's frame loop or heartbeat.
//! for event in runner.tick(Duration::from_millis(250))? {
//!     render(event);
//! }
//! ```
//!
//! ## What This Is Not
//!
//! Respite is **not**:
//! - A scheduler or a timer service
//! - A content authoring tool
//! - A storage layer (see `respite-persistence`)

// Core modules
mod catalog;
mod clock;
mod config;
mod context;
mod countdown;
mod definition;
mod error;
mod host;
mod id_macro;
mod ids;
mod instance;
mod outcome;
mod player;
mod records;
mod routine;
mod runner;
mod sequencer;
mod sink;

// Re-export identifiers
pub use ids::{ElementId, InstanceId, ProtocolId, RoutineId, SessionId, UserId};

// Re-export error types
pub use error::{DefinitionIssue, EngineError, Result};

// Re-export configuration and time sources
pub use clock::{SystemClock, WallClock, TICK_MS};
pub use config::{DurationUnit, EngineConfig};
pub use context::EngineContext;

// Re-export definitions and loading
pub use catalog::{Catalog, CatalogDocument, DefinitionSource, ResolvedSession};
pub use definition::{
    Constituent, ElementDefinition, ElementKind, Phase, ProtocolDefinition, RoutineDefinition,
    SessionDefinition,
};
pub use records::{
    ConstituentRecord, ElementRecord, PhaseRecord, ProtocolRecord, RoutineRecord, SessionRecord,
};

// Re-export execution types
pub use player::{ElementCue, ElementEvent, ElementEvents, ElementOutcome, ElementPlayer};
pub use routine::{
    ConstituentReport, ConstituentStatus, RoutineEvent, RoutineEvents, RoutineReport,
    RoutineRunner, RoutineStatus,
};
pub use runner::{SessionEvent, SessionEvents, SessionRunner};
pub use sequencer::{PhaseEvent, PhaseEvents, PhaseSequencer, PhaseTick};

// Re-export instance and outcome types
pub use instance::{AbandonReason, InstanceStatus, Measurements, SessionInstance};
pub use outcome::{Annotation, OutcomeRecorder, SessionOutcome};
pub use sink::{NullSink, SnapshotSink, Transition, TransitionKind};

// Re-export the host
pub use host::SessionHost;
