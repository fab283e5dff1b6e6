use respite_core::{
    EngineContext, EngineConfig, InstanceStatus, SessionHost, SessionId, SnapshotSink,
};
use respite_persistence::{
    recover_live, snapshot_channel, InstanceStore, MemoryInstanceStore, WriterStats,
};
use respite_testing::fixtures::{catalog, user};
use respite_testing::ManualClock;
use std::sync::Arc;
use std::time::Duration;

fn host_with_store(store: Arc<MemoryInstanceStore>) -> (SessionHost, tokio::task::JoinHandle<WriterStats>) {
    let (sink, writer) = snapshot_channel(store);
    let sink: Arc<dyn SnapshotSink> = Arc::new(sink);
    let ctx = EngineContext::new(EngineConfig::default())
        .with_clock(Arc::new(ManualClock::epoch()))
        .with_sink(sink);
    (SessionHost::new(Arc::new(catalog()), ctx), writer.spawn())
}

#[tokio::test]
async fn test_writer_persists_snapshots_and_outcomes() {
    let store = Arc::new(MemoryInstanceStore::new());
    let (host, writer) = host_with_store(store.clone());

    let owner = user(10);
    let (id, _) = host
        .begin_with(owner, &SessionId::new("four-step"), |runner| {
            runner.record_craving_before(8).map(|_| ())
        })
        .unwrap();
    for _ in 0..40 {
        host.heartbeat(Duration::from_secs(1));
    }
    host.with_runner(id, owner, |runner| runner.record_craving_after(2))
        .unwrap();
    drop(host);

    let stats = writer.await.unwrap();
    assert_eq!(stats.failed, 0);
    assert!(stats.outcomes_written >= 1);

    let stored = store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.status, InstanceStatus::Completed);
    assert_eq!(stored.completed_elements.len(), 4);

    let outcome = store.load_outcome(id).await.unwrap().unwrap();
    assert_eq!(outcome.effectiveness_delta, Some(6));

    let history = store.list_for_user(owner).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_recover_live_after_restart() {
    let store = Arc::new(MemoryInstanceStore::new());
    let owner = user(11);

    let (host, writer) = host_with_store(store.clone());
    let (id, _) = host.begin(owner, &SessionId::new("four-step")).unwrap();
    for _ in 0..15 {
        host.heartbeat(Duration::from_secs(1));
    }
    host.with_runner(id, owner, |runner| runner.pause()).unwrap();
    drop(host);
    writer.await.unwrap();

    // New process: same store, fresh host.
    let (host, writer) = host_with_store(store.clone());
    let recovered = recover_live(store.as_ref(), &host).await.unwrap();
    assert_eq!(recovered, vec![id]);
    assert_eq!(host.active_for(&owner), Some(id));

    let snapshot = host
        .with_runner(id, owner, |runner| Ok(runner.snapshot().cloned()))
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.status, InstanceStatus::Paused);
    assert_eq!(snapshot.current_element_index, 1);

    host.with_runner(id, owner, |runner| runner.resume()).unwrap();
    // Element e1 restarts from the beginning: 10s, then e2 and e3.
    for _ in 0..30 {
        host.heartbeat(Duration::from_secs(1));
    }
    assert_eq!(host.active_for(&owner), None);
    drop(host);
    writer.await.unwrap();

    assert_eq!(
        store.load(id).await.unwrap().map(|s| s.status),
        Some(InstanceStatus::Completed)
    );
    assert!(store.list_live().await.unwrap().is_empty());
}
