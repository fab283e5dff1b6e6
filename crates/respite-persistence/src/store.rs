//! Instance store interface and the in-memory implementation.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use respite_core::{InstanceId, SessionInstance, SessionOutcome, UserId};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PersistenceError;

/// Durable home for instance snapshots and outcome records.
///
/// Implementations keep only the latest snapshot per instance. Writes arrive
/// from a single background writer, so they need not be transactional.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Store the latest snapshot of an instance.
    ///
    /// Must reject a live snapshot for an instance already stored as terminal.
    async fn save(&self, snapshot: &SessionInstance) -> Result<()>;

    async fn load(&self, id: InstanceId) -> Result<Option<SessionInstance>>;

    /// Snapshots of one user, newest first.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<SessionInstance>>;

    /// Snapshots that are neither completed nor abandoned.
    async fn list_live(&self) -> Result<Vec<SessionInstance>>;

    async fn save_outcome(&self, outcome: &SessionOutcome) -> Result<()>;

    async fn load_outcome(&self, id: InstanceId) -> Result<Option<SessionOutcome>>;
}

/// Store backed by JSON documents in concurrent maps.
///
/// Records round-trip through `serde_json` exactly like a document database
/// would see them, which keeps the wire shape honest in tests.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    snapshots: DashMap<InstanceId, serde_json::Value>,
    outcomes: DashMap<InstanceId, serde_json::Value>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    fn stored(&self, id: InstanceId) -> Result<Option<SessionInstance>> {
        self.snapshots
            .get(&id)
            .map(|doc| decode(id, doc.value()))
            .transpose()
    }

    fn all_snapshots(&self) -> Result<Vec<SessionInstance>> {
        self.snapshots
            .iter()
            .map(|doc| decode(*doc.key(), doc.value()))
            .collect()
    }
}

fn encode<T: Serialize>(instance: InstanceId, record: &T) -> Result<serde_json::Value> {
    serde_json::to_value(record)
        .map_err(|source| PersistenceError::Encode { instance, source }.into())
}

fn decode<T: DeserializeOwned>(instance: InstanceId, doc: &serde_json::Value) -> Result<T> {
    T::deserialize(doc).map_err(|source| PersistenceError::Corrupt { instance, source }.into())
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn save(&self, snapshot: &SessionInstance) -> Result<()> {
        if let Some(existing) = self.stored(snapshot.id)? {
            if existing.is_terminal() && !snapshot.is_terminal() {
                return Err(PersistenceError::StaleSnapshot {
                    instance: snapshot.id,
                }
                .into());
            }
        }
        let doc = encode(snapshot.id, snapshot)?;
        self.snapshots.insert(snapshot.id, doc);
        Ok(())
    }

    async fn load(&self, id: InstanceId) -> Result<Option<SessionInstance>> {
        self.stored(id)
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<SessionInstance>> {
        let mut found: Vec<SessionInstance> = self
            .all_snapshots()?
            .into_iter()
            .filter(|s| s.user_id == user)
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(found)
    }

    async fn list_live(&self) -> Result<Vec<SessionInstance>> {
        Ok(self
            .all_snapshots()?
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect())
    }

    async fn save_outcome(&self, outcome: &SessionOutcome) -> Result<()> {
        let id = outcome.instance.id;
        let doc = encode(id, outcome)?;
        self.outcomes.insert(id, doc);
        Ok(())
    }

    async fn load_outcome(&self, id: InstanceId) -> Result<Option<SessionOutcome>> {
        self.outcomes
            .get(&id)
            .map(|doc| decode(id, doc.value()))
            .transpose()
    }
}
