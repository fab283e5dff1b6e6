//! Shared collaborators handed to every runner.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::{SystemClock, WallClock};
use crate::config::EngineConfig;
use crate::sink::{NullSink, SnapshotSink, Transition};

/// Clock, configuration and snapshot sink for a group of runners.
///
/// Cloning is cheap; all parts are reference counted.
#[derive(Clone)]
pub struct EngineContext {
    clock: Arc<dyn WallClock>,
    config: Arc<EngineConfig>,
    sink: Arc<dyn SnapshotSink>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn publish(&self, transition: &Transition) {
        self.sink.publish(transition);
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
