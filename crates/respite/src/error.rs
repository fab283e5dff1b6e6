//! Error types for the session engine.
//!
//! Only structural failures are errors. Skipped mandatory elements and routine
//! budget overruns are recorded as annotations on the outcome instead (see
//! [`crate::outcome::Annotation`]).

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// What is wrong with a protocol, session or routine definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionIssue {
    #[error("no phases")]
    NoPhases,

    #[error("cycle count must be positive")]
    NoCycles,

    #[error("phase '{phase}' has a non-positive duration")]
    NonPositivePhase { phase: String },

    #[error("phase name is empty at index {index}")]
    EmptyPhaseName { index: usize },

    #[error("no elements")]
    NoElements,

    #[error("duplicate element order {order}")]
    DuplicateOrder { order: i64 },

    #[error("duplicate element id '{element}'")]
    DuplicateElement { element: String },

    #[error("element '{element}' has unknown kind '{kind}'")]
    UnknownKind { element: String, kind: String },

    #[error("element '{element}' is missing required field '{field}'")]
    MissingField {
        element: String,
        field: &'static str,
    },

    #[error("element '{element}' has a non-positive {field}")]
    NonPositiveField {
        element: String,
        field: &'static str,
    },

    #[error("element '{element}' references unknown protocol '{protocol}'")]
    UnknownProtocol { element: String, protocol: String },

    #[error("value {value} {unit} does not fit in whole seconds")]
    DurationOverflow { value: u64, unit: &'static str },

    #[error("routine has no constituents")]
    NoConstituents,

    #[error("routine budget must be positive")]
    NoBudget,

    #[error("routine references unknown session '{session}'")]
    UnknownSession { session: String },

    #[error("malformed record: {message}")]
    Malformed { message: String },
}

/// Errors surfaced by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A definition failed validation at the loading boundary. Never retried.
    #[error("invalid definition '{definition}': {issue}")]
    InvalidProtocol {
        definition: String,
        issue: DefinitionIssue,
    },

    /// An operation was requested from a state that does not allow it.
    #[error("cannot {action} {machine} while {from}")]
    InvalidTransition {
        machine: &'static str,
        action: &'static str,
        from: String,
    },

    /// A definition or instance lookup came back empty.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A craving rating outside the configured scale.
    #[error("craving rating {value} is outside the scale {min}..={max}")]
    RatingOutOfRange { value: i32, min: i32, max: i32 },

    /// The caller does not own the instance it addressed.
    #[error("instance '{instance}' is not owned by the caller")]
    NotOwner { instance: String },

    /// The user already has a live instance.
    #[error("user '{user}' already has active instance '{instance}'")]
    AlreadyActive { user: String, instance: String },

    /// Engine configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn invalid_definition(definition: impl ToString, issue: DefinitionIssue) -> Self {
        Self::InvalidProtocol {
            definition: definition.to_string(),
            issue,
        }
    }

    pub fn invalid_transition(
        machine: &'static str,
        action: &'static str,
        from: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            machine,
            action,
            from: from.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True for errors raised while loading definitions.
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::InvalidProtocol { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_names_state() {
        let err = EngineError::invalid_transition("session", "resume", "completed");
        assert_eq!(err.to_string(), "cannot resume session while completed");
    }

    #[test]
    fn test_definition_error_carries_issue() {
        let err = EngineError::invalid_definition(
            "box",
            DefinitionIssue::NonPositivePhase {
                phase: "inhale".into(),
            },
        );
        assert!(err.is_definition_error());
        assert_eq!(
            err.to_string(),
            "invalid definition 'box': phase 'inhale' has a non-positive duration"
        );
    }
}
