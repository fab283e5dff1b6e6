//! Snapshot persistence for the Respite engine.
//!
//! The engine publishes every instance transition to a
//! [`SnapshotSink`](respite_core::SnapshotSink) synchronously from its tick
//! path. This crate provides the asynchronous side:
//!
//! - [`InstanceStore`]: where snapshots and outcome records live
//! - [`MemoryInstanceStore`]: a `DashMap`-backed store for tests and demos
//! - [`snapshot_channel`]: a non-blocking [`ChannelSink`] plus a
//!   [`SnapshotWriter`] task that drains it into a store
//! - [`recover_live`]: reloads live instances into a
//!   [`SessionHost`](respite_core::SessionHost) after a restart
//!
//! # Usage
//!
//! ```rust,ignore
//! use respite_persistence::{recover_live, snapshot_channel, MemoryInstanceStore};
//!
//! let store = Arc::new(MemoryInstanceStore::new());
//! let (sink, writer) = snapshot_channel(store.clone());
//! let writer = writer.spawn();
//!
//! let ctx = EngineContext::new(config).with_sink(Arc::new(sink));
//! let host = SessionHost::new(catalog, ctx);
//! recover_live(store.as_ref(), &host).await?;
//! ```

mod error;
mod recovery;
mod store;
mod writer;

pub use error::PersistenceError;
pub use recovery::recover_live;
pub use store::{InstanceStore, MemoryInstanceStore};
pub use writer::{snapshot_channel, ChannelSink, SnapshotWriter, WriterStats};
