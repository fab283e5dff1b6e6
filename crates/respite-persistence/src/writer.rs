//! Channel sink plus the background task that drains it into a store.
//!
//! ```text
//! SessionRunner ──publish()──► ChannelSink ──mpsc──► SnapshotWriter ──► InstanceStore
//!   (sync, tick path)          (never blocks)         (tokio task)
//! ```

use respite_core::{SnapshotSink, Transition};
use smallvec::SmallVec;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::InstanceStore;

/// Upper bound on transitions folded into one write batch.
const MAX_BATCH: usize = 64;

type Batch = SmallVec<[Transition; 8]>;

/// [`SnapshotSink`] that forwards transitions to a [`SnapshotWriter`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Transition>,
}

impl SnapshotSink for ChannelSink {
    fn publish(&self, transition: &Transition) {
        if self.tx.send(transition.clone()).is_err() {
            tracing::warn!(
                instance_id = %transition.snapshot.id,
                status = %transition.snapshot.status,
                "snapshot writer closed, snapshot dropped"
            );
        }
    }
}

/// Counters reported when the writer shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub snapshots_written: usize,
    pub outcomes_written: usize,
    /// Snapshots superseded by a later one in the same batch.
    pub coalesced: usize,
    pub failed: usize,
}

/// Drains a [`ChannelSink`] into an [`InstanceStore`].
pub struct SnapshotWriter<S: ?Sized> {
    store: Arc<S>,
    rx: mpsc::UnboundedReceiver<Transition>,
    stats: WriterStats,
}

/// Create a connected sink and writer.
///
/// The writer stops once every clone of the sink has been dropped and the
/// queue is empty.
pub fn snapshot_channel<S>(store: Arc<S>) -> (ChannelSink, SnapshotWriter<S>)
where
    S: InstanceStore + ?Sized + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelSink { tx },
        SnapshotWriter {
            store,
            rx,
            stats: WriterStats::default(),
        },
    )
}

impl<S> SnapshotWriter<S>
where
    S: InstanceStore + ?Sized + 'static,
{
    pub fn spawn(self) -> JoinHandle<WriterStats> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> WriterStats {
        while let Some(first) = self.rx.recv().await {
            let mut batch = Batch::new();
            batch.push(first);
            while batch.len() < MAX_BATCH {
                match self.rx.try_recv() {
                    Ok(next) => batch.push(next),
                    Err(_) => break,
                }
            }
            self.write(batch).await;
        }
        tracing::debug!(stats = ?self.stats, "snapshot writer stopped");
        self.stats
    }

    async fn write(&mut self, batch: Batch) {
        for (position, transition) in batch.iter().enumerate() {
            let id = transition.snapshot.id;
            let superseded = batch[position + 1..]
                .iter()
                .any(|later| later.snapshot.id == id);
            if superseded && transition.outcome.is_none() {
                self.stats.coalesced += 1;
                continue;
            }

            match self.store.save(&transition.snapshot).await {
                Ok(()) => self.stats.snapshots_written += 1,
                Err(error) => {
                    self.stats.failed += 1;
                    tracing::warn!(instance_id = %id, error = %error, "snapshot write failed");
                    continue;
                }
            }
            if let Some(outcome) = &transition.outcome {
                match self.store.save_outcome(outcome).await {
                    Ok(()) => self.stats.outcomes_written += 1,
                    Err(error) => {
                        self.stats.failed += 1;
                        tracing::warn!(instance_id = %id, error = %error, "outcome write failed");
                    }
                }
            }
        }
    }
}
