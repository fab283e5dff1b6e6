//! Session host: the registry of live runners behind an API boundary.
//!
//! The host enforces one live instance per user and checks ownership on every
//! call. Runners sit behind their own mutex inside a [`DashMap`], so distinct
//! instances never contend and the host can be shared across threads.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::catalog::DefinitionSource;
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::ids::{InstanceId, SessionId, UserId};
use crate::instance::SessionInstance;
use crate::outcome::SessionOutcome;
use crate::runner::{SessionEvents, SessionRunner};

type SharedRunner = Arc<Mutex<SessionRunner>>;

fn lock(runner: &SharedRunner) -> MutexGuard<'_, SessionRunner> {
    runner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of [`SessionRunner`]s keyed by instance.
pub struct SessionHost {
    source: Arc<dyn DefinitionSource>,
    ctx: EngineContext,
    runners: DashMap<InstanceId, SharedRunner>,
    active: DashMap<UserId, InstanceId>,
}

impl SessionHost {
    pub fn new(source: Arc<dyn DefinitionSource>, ctx: EngineContext) -> Self {
        Self {
            source,
            ctx,
            runners: DashMap::new(),
            active: DashMap::new(),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Live instance of `user`, if any.
    pub fn active_for(&self, user: &UserId) -> Option<InstanceId> {
        self.active.get(user).map(|entry| *entry.value())
    }

    /// Number of registered runners, terminal ones included.
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Create and start a run of `session` for `user`.
    pub fn begin(&self, user: UserId, session: &SessionId) -> Result<(InstanceId, SessionEvents)> {
        self.begin_with(user, session, |_| Ok(()))
    }

    /// Like [`begin`](Self::begin), but lets the caller record before-ratings
    /// between creation and start.
    ///
    /// `prepare` and the start transition run with no host lock held.
    pub fn begin_with(
        &self,
        user: UserId,
        session: &SessionId,
        prepare: impl FnOnce(&mut SessionRunner) -> Result<()>,
    ) -> Result<(InstanceId, SessionEvents)> {
        if let Some(current) = self.active_for(&user) {
            return Err(EngineError::AlreadyActive {
                user: user.to_string(),
                instance: current.to_string(),
            });
        }
        let mut runner = SessionRunner::load(self.source.as_ref(), session, user, self.ctx.clone())?;
        prepare(&mut runner)?;

        let id = runner.instance_id();
        let shared = self.register(user, runner)?;
        let started = lock(&shared).start();
        match started {
            Ok(events) => Ok((id, events)),
            Err(error) => {
                self.runners.remove(&id);
                self.free_slot(user, id);
                Err(error)
            }
        }
    }

    /// Run `op` against the runner of `instance` on behalf of `user`.
    ///
    /// Fails with `NotOwner` when the instance belongs to someone else. When the
    /// operation leaves the run terminal the user's active slot is freed; the
    /// runner stays registered for late after-ratings until released.
    pub fn with_runner<R>(
        &self,
        instance: InstanceId,
        user: UserId,
        op: impl FnOnce(&mut SessionRunner) -> Result<R>,
    ) -> Result<R> {
        let shared = self.shared(instance)?;
        let mut runner = lock(&shared);
        if runner.user_id() != user {
            tracing::warn!(instance_id = %instance, user_id = %user, "runner access by non-owner");
            return Err(EngineError::NotOwner {
                instance: instance.to_string(),
            });
        }
        let result = op(&mut runner);
        if runner.is_terminal() {
            self.free_slot(user, instance);
        }
        result
    }

    /// Pump `elapsed` into every live runner.
    ///
    /// Errors are logged per instance and do not stop the sweep.
    pub fn heartbeat(&self, elapsed: Duration) -> Vec<(InstanceId, SessionEvents)> {
        let live: Vec<(InstanceId, SharedRunner)> = self
            .runners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut results = Vec::new();
        for (id, shared) in live {
            let mut runner = lock(&shared);
            if runner.is_terminal() {
                continue;
            }
            match runner.tick(elapsed) {
                Ok(events) => {
                    if runner.is_terminal() {
                        self.free_slot(runner.user_id(), id);
                    }
                    if !events.is_empty() {
                        results.push((id, events));
                    }
                }
                Err(error) => {
                    tracing::warn!(instance_id = %id, %error, "heartbeat tick failed");
                }
            }
        }
        results
    }

    /// Re-register a run from its last persisted snapshot.
    pub fn recover(&self, snapshot: SessionInstance) -> Result<InstanceId> {
        let user = snapshot.user_id;
        let runner = SessionRunner::recover(snapshot, self.source.as_ref(), self.ctx.clone())?;
        let id = runner.instance_id();
        self.register(user, runner)?;
        Ok(id)
    }

    /// Drop a terminal runner and hand back its outcome.
    pub fn release(&self, instance: InstanceId, user: UserId) -> Result<Option<SessionOutcome>> {
        let outcome = self.with_runner(instance, user, |runner| {
            if !runner.is_terminal() {
                let status = runner
                    .status()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "not started".into());
                return Err(EngineError::invalid_transition("host", "release", status));
            }
            Ok(runner.outcome().cloned())
        })?;
        self.runners.remove(&instance);
        tracing::debug!(instance_id = %instance, "runner released");
        Ok(outcome)
    }

    /// Claim `user`'s active slot and register `runner`. The slot's shard lock
    /// is released before returning.
    fn register(&self, user: UserId, runner: SessionRunner) -> Result<SharedRunner> {
        let id = runner.instance_id();
        match self.active.entry(user) {
            Entry::Occupied(entry) => {
                return Err(EngineError::AlreadyActive {
                    user: user.to_string(),
                    instance: entry.get().to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        let shared = Arc::new(Mutex::new(runner));
        self.runners.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    fn shared(&self, instance: InstanceId) -> Result<SharedRunner> {
        self.runners
            .get(&instance)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::not_found("instance", instance))
    }

    fn free_slot(&self, user: UserId, instance: InstanceId) {
        self.active.remove_if(&user, |_, current| *current == instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::definition::{ElementDefinition, SessionDefinition};
    use crate::instance::{AbandonReason, InstanceStatus};
    use crate::sink::{SnapshotSink, Transition};
    use std::sync::{OnceLock, Weak};

    fn host() -> SessionHost {
        let mut catalog = Catalog::new();
        catalog.insert_session(
            SessionDefinition::new("short", None, vec![ElementDefinition::timed("t", 1, 3)])
                .unwrap(),
        );
        SessionHost::new(Arc::new(catalog), EngineContext::default())
    }

    #[test]
    fn test_one_live_instance_per_user() {
        let host = host();
        let user = UserId::new();
        let (id, _) = host.begin(user, &SessionId::new("short")).unwrap();
        assert_eq!(host.active_for(&user), Some(id));
        assert!(matches!(
            host.begin(user, &SessionId::new("short")),
            Err(EngineError::AlreadyActive { .. })
        ));
        assert!(host.begin(UserId::new(), &SessionId::new("short")).is_ok());
    }

    #[test]
    fn test_non_owner_is_rejected() {
        let host = host();
        let (id, _) = host.begin(UserId::new(), &SessionId::new("short")).unwrap();
        let err = host.with_runner(id, UserId::new(), |r| r.pause()).unwrap_err();
        assert!(matches!(err, EngineError::NotOwner { .. }));
    }

    #[test]
    fn test_heartbeat_completes_and_frees_slot() {
        let host = host();
        let user = UserId::new();
        let (id, _) = host.begin(user, &SessionId::new("short")).unwrap();
        host.heartbeat(Duration::from_secs(2));
        assert_eq!(host.active_for(&user), Some(id));
        let swept = host.heartbeat(Duration::from_secs(1));
        assert_eq!(swept.len(), 1);
        assert_eq!(host.active_for(&user), None);

        let status = host.with_runner(id, user, |r| Ok(r.status())).unwrap();
        assert_eq!(status, Some(InstanceStatus::Completed));
        assert!(host.release(id, user).unwrap().is_some());
        assert!(host.is_empty());
    }

    #[test]
    fn test_release_requires_terminal_run() {
        let host = host();
        let user = UserId::new();
        let (id, _) = host.begin(user, &SessionId::new("short")).unwrap();
        assert!(host.release(id, user).is_err());
        host.with_runner(id, user, |r| r.abort(AbandonReason::UserStopped))
            .unwrap();
        assert_eq!(host.active_for(&user), None);
        assert!(host.release(id, user).is_ok());
    }

    #[derive(Default)]
    struct Inspect {
        host: OnceLock<Weak<SessionHost>>,
        seen: Mutex<Vec<Option<InstanceId>>>,
    }

    impl SnapshotSink for Inspect {
        fn publish(&self, transition: &Transition) {
            if let Some(host) = self.host.get().and_then(Weak::upgrade) {
                let active = host.active_for(&transition.snapshot.user_id);
                self.seen.lock().unwrap().push(active);
            }
        }
    }

    #[test]
    fn test_sink_may_query_host_during_begin() {
        let mut catalog = Catalog::new();
        catalog.insert_session(
            SessionDefinition::new("short", None, vec![ElementDefinition::timed("t", 1, 3)])
                .unwrap(),
        );
        let sink = Arc::new(Inspect::default());
        let ctx = EngineContext::default().with_sink(sink.clone());
        let host = Arc::new(SessionHost::new(Arc::new(catalog), ctx));
        sink.host.set(Arc::downgrade(&host)).unwrap();

        let user = UserId::new();
        let (id, _) = host
            .begin_with(user, &SessionId::new("short"), |runner| {
                assert_eq!(host.active_for(&user), None);
                runner.record_craving_before(6).map(|_| ())
            })
            .unwrap();
        assert_eq!(sink.seen.lock().unwrap().last(), Some(&Some(id)));
    }

    #[test]
    fn test_unknown_session_leaves_no_slot() {
        let host = host();
        let user = UserId::new();
        assert!(matches!(
            host.begin(user, &SessionId::new("missing")),
            Err(EngineError::NotFound { .. })
        ));
        assert_eq!(host.active_for(&user), None);
    }
}
