/// Range deleter tests
///
/// Exact orphan accounting per batch, dedupe, majority gating, restart
/// resume, and the background worker lifecycle
/// Run with: cargo test --test range_deleter_tests

use std::sync::Arc;
use std::time::Duration;

use memshard::{
    ChunkCatalog, ChunkRange, Document, ID_FIELD, InMemoryMetadataStore, InMemoryReplication,
    InMemoryStorageEngine, KeyBound, OpTime, RangeDeleter, RangeDeletionTask,
    ReplicationCoordinator, ShardId, ShardingConfig, StorageEngine, Value,
    spawn_range_deleter_worker,
};

struct Fixture {
    metadata: Arc<InMemoryMetadataStore>,
    storage: Arc<InMemoryStorageEngine>,
    catalog: Arc<ChunkCatalog>,
    replication: Arc<InMemoryReplication>,
}

impl Fixture {
    async fn new() -> Self {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let storage = Arc::new(InMemoryStorageEngine::new());
        let replication = InMemoryReplication::new();
        let catalog = Arc::new(ChunkCatalog::open(metadata.clone()).await.unwrap());
        catalog
            .shard_collection(&"test.items".to_string(), "x", ShardId::new("shard0"))
            .await
            .unwrap();
        Self {
            metadata,
            storage,
            catalog,
            replication,
        }
    }

    fn deleter(&self, batch_size: usize) -> Arc<RangeDeleter> {
        RangeDeleter::new(
            self.metadata.clone(),
            self.storage.clone(),
            self.catalog.clone(),
            self.replication.clone(),
            ShardingConfig::new()
                .range_deleter_batch_size(batch_size)
                .range_deleter_interval(Duration::from_millis(5)),
        )
    }

    async fn seed_orphans(&self, count: i64) {
        let ns = "test.items".to_string();
        for i in 0..count {
            let op = self.replication.record_write();
            self.storage
                .insert(&ns, Document::new().with(ID_FIELD, i).with("x", i), op)
                .await
                .unwrap();
        }
    }
}

fn full_task(count: u64) -> RangeDeletionTask {
    RangeDeletionTask::new("test.items".to_string(), ChunkRange::full(), OpTime(0), count)
}

#[tokio::test]
async fn test_orphan_counter_exact_after_every_batch() {
    let fixture = Fixture::new().await;
    fixture.seed_orphans(1000).await;
    let deleter = fixture.deleter(128);
    deleter.schedule(full_task(1000)).await.unwrap();

    // 1000 orphans at batch size 128: seven full batches then a final 104.
    let mut expected = vec![872u64, 744, 616, 488, 360, 232, 104, 0];
    for want in expected.drain(..) {
        let remaining = deleter.run_single_batch().await.unwrap().unwrap();
        assert_eq!(remaining, want);
        if want > 0 {
            let tasks = deleter.pending_tasks().await.unwrap();
            assert_eq!(tasks[0].num_orphan_docs, want, "persisted count matches");
        }
    }

    assert!(deleter.pending_tasks().await.unwrap().is_empty());
    assert_eq!(
        fixture
            .storage
            .count_in_range(&"test.items".to_string(), "x", &ChunkRange::full())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_schedule_dedupes_by_namespace_and_range() {
    let fixture = Fixture::new().await;
    let deleter = fixture.deleter(128);

    deleter.schedule(full_task(100)).await.unwrap();
    deleter.schedule(full_task(999)).await.unwrap();

    let tasks = deleter.pending_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].num_orphan_docs, 100, "first schedule wins");
}

#[tokio::test]
async fn test_deletion_waits_for_majority_commit() {
    let fixture = Fixture::new().await;
    fixture.seed_orphans(10).await;
    let deleter = fixture.deleter(128);

    // The commit op time is applied locally but not yet majority-durable.
    fixture.replication.hold_majority();
    let commit_op = fixture.replication.record_write();
    deleter
        .schedule(RangeDeletionTask::new(
            "test.items".to_string(),
            ChunkRange::full(),
            commit_op,
            10,
        ))
        .await
        .unwrap();

    assert_eq!(deleter.run_single_batch().await.unwrap(), None);
    assert_eq!(
        fixture
            .storage
            .count_in_range(&"test.items".to_string(), "x", &ChunkRange::full())
            .await
            .unwrap(),
        10,
        "nothing deleted while the commit could still roll back"
    );

    fixture.replication.release_majority();
    assert_eq!(deleter.run_single_batch().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_restart_resumes_from_persisted_count() {
    let fixture = Fixture::new().await;
    fixture.seed_orphans(300).await;
    let deleter = fixture.deleter(128);
    deleter.schedule(full_task(300)).await.unwrap();

    assert_eq!(deleter.run_single_batch().await.unwrap(), Some(172));
    drop(deleter);

    // A new deleter over the same durable state picks up mid-task.
    let restarted = fixture.deleter(128);
    let tasks = restarted.pending_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].num_orphan_docs, 172);

    assert_eq!(restarted.run_single_batch().await.unwrap(), Some(44));
    assert_eq!(restarted.run_single_batch().await.unwrap(), Some(0));
    assert!(restarted.pending_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tasks_drain_fifo_by_schedule_time() {
    let fixture = Fixture::new().await;
    let ns = "test.items".to_string();
    fixture.catalog
        .split(&ns, &ChunkRange::full(), vec![Value::Integer(100)])
        .await
        .unwrap();
    fixture.seed_orphans(200).await;
    let deleter = fixture.deleter(1000);

    let low = ChunkRange::new(KeyBound::MinKey, KeyBound::value(100)).unwrap();
    let high = ChunkRange::new(KeyBound::value(100), KeyBound::MaxKey).unwrap();
    deleter
        .schedule(RangeDeletionTask::new(ns.clone(), low.clone(), OpTime(0), 100))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    deleter
        .schedule(RangeDeletionTask::new(ns.clone(), high, OpTime(0), 100))
        .await
        .unwrap();

    // The older task's range empties first.
    deleter.run_single_batch().await.unwrap();
    assert_eq!(
        fixture.storage.count_in_range(&ns, "x", &low).await.unwrap(),
        0
    );
    assert_eq!(deleter.pending_tasks().await.unwrap().len(), 1);

    deleter.drain_ready().await.unwrap();
    assert_eq!(
        fixture
            .storage
            .count_in_range(&ns, "x", &ChunkRange::full())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_background_worker_pauses_and_completes() {
    let fixture = Fixture::new().await;
    fixture.seed_orphans(256).await;
    let deleter = fixture.deleter(64);
    deleter.suspend();
    deleter.schedule(full_task(256)).await.unwrap();

    let worker = spawn_range_deleter_worker(deleter.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        deleter.pending_tasks().await.unwrap()[0].num_orphan_docs,
        256,
        "suspended worker takes no batches"
    );

    deleter.resume();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if deleter.pending_tasks().await.unwrap().is_empty() {
            break;
        }
    }
    assert!(deleter.pending_tasks().await.unwrap().is_empty());
    worker.stop().await.unwrap();
}
