//! Transition records and the snapshot sink they are published to.

use serde::{Deserialize, Serialize};

use crate::ids::ElementId;
use crate::instance::{AbandonReason, SessionInstance};
use crate::outcome::SessionOutcome;
use crate::player::ElementOutcome;

/// What changed between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionKind {
    Started,
    /// First phase or bout completed.
    Progressed,
    ElementEnded {
        #[serde(rename = "elementId")]
        element_id: ElementId,
        outcome: ElementOutcome,
    },
    Paused,
    Resumed,
    Completed,
    Abandoned {
        reason: AbandonReason,
    },
    MeasurementRecorded,
}

/// One instance transition: the new snapshot plus the outcome when it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub kind: TransitionKind,
    pub snapshot: SessionInstance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        self.snapshot.is_terminal()
    }
}

/// Receives every transition, fire-and-forget.
///
/// Implementations must not block: the runner calls `publish` synchronously
/// from inside `tick`. Anything slow belongs behind a queue.
pub trait SnapshotSink: Send + Sync {
    fn publish(&self, transition: &Transition);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn publish(&self, _transition: &Transition) {}
}
