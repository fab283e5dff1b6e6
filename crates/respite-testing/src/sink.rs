use respite_core::{InstanceStatus, SessionInstance, SnapshotSink, Transition, TransitionKind};
use std::sync::Mutex;

/// Sink that keeps every transition it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    transitions: Mutex<Vec<Transition>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<TransitionKind> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.kind.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<InstanceStatus> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.snapshot.status)
            .collect()
    }

    pub fn last_snapshot(&self) -> Option<SessionInstance> {
        self.transitions
            .lock()
            .unwrap()
            .last()
            .map(|t| t.snapshot.clone())
    }

    pub fn len(&self) -> usize {
        self.transitions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.transitions.lock().unwrap().clear();
    }
}

impl SnapshotSink for RecordingSink {
    fn publish(&self, transition: &Transition) {
        self.transitions.lock().unwrap().push(transition.clone());
    }
}
