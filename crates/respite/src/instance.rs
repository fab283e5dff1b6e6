//! Session instance snapshots.
//!
//! A [`SessionInstance`] is a value: every transition builds a new snapshot from
//! the previous one, so the host can persist, diff or replay them freely. Only
//! the session runner decides *which* transitions are legal; the helpers here
//! just produce the next value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ElementId, InstanceId, SessionId, UserId};

/// Lifecycle state of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Started,
    InProgress,
    Paused,
    Completed,
    Abandoned,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Started => "started",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Paused => "paused",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an instance ended without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// Explicit stop by the user.
    UserStopped,
    /// Paused for longer than the configured timeout.
    Timeout,
    /// A routine moved past this constituent on request.
    SkippedByRoutine,
    /// The enclosing routine was stopped.
    RoutineStopped,
}

/// Self-reported ratings captured around a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    pub craving_before: Option<i32>,
    pub craving_after: Option<i32>,
    pub mood_before: Option<String>,
    pub mood_after: Option<String>,
}

/// Persisted state of one (user, session) execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInstance {
    pub id: InstanceId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub status: InstanceStatus,
    pub current_element_index: usize,
    /// Finished or skipped elements, in the order they ended. Never shrinks.
    pub completed_elements: Vec<ElementId>,
    /// The skipped subset of `completed_elements`.
    #[serde(default)]
    pub skipped_elements: Vec<ElementId>,
    #[serde(flatten)]
    pub measurements: Measurements,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub abandon_reason: Option<AbandonReason>,
    /// Status to restore on resume. Set only while paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_status: Option<InstanceStatus>,
}

impl SessionInstance {
    pub(crate) fn begin(
        id: InstanceId,
        user_id: UserId,
        session_id: SessionId,
        measurements: Measurements,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            session_id,
            status: InstanceStatus::Started,
            current_element_index: 0,
            completed_elements: Vec::new(),
            skipped_elements: Vec::new(),
            measurements,
            started_at: now,
            completed_at: None,
            abandon_reason: None,
            resume_status: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_completed(&self, element: &ElementId) -> bool {
        self.completed_elements.contains(element)
    }

    pub(crate) fn with_status(&self, status: InstanceStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub(crate) fn paused_from(&self, status: InstanceStatus) -> Self {
        Self {
            status: InstanceStatus::Paused,
            resume_status: Some(status),
            ..self.clone()
        }
    }

    pub(crate) fn resumed(&self, status: InstanceStatus) -> Self {
        Self {
            status,
            resume_status: None,
            ..self.clone()
        }
    }

    /// Record that the current element ended and move the cursor past it.
    pub(crate) fn element_ended(&self, element: &ElementId, skipped: bool) -> Self {
        let mut next = self.clone();
        if !next.has_completed(element) {
            next.completed_elements.push(element.clone());
        }
        if skipped && !next.skipped_elements.contains(element) {
            next.skipped_elements.push(element.clone());
        }
        next.current_element_index += 1;
        next
    }

    pub(crate) fn completed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: InstanceStatus::Completed,
            completed_at: Some(now),
            resume_status: None,
            ..self.clone()
        }
    }

    pub(crate) fn abandoned(&self, reason: AbandonReason, now: DateTime<Utc>) -> Self {
        Self {
            status: InstanceStatus::Abandoned,
            completed_at: Some(now),
            abandon_reason: Some(reason),
            resume_status: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_measurements(&self, measurements: Measurements) -> Self {
        Self {
            measurements,
            ..self.clone()
        }
    }
}
