/// End-to-end migration scenario
///
/// A range with live traffic migrates between shards while reads stay
/// correct throughout, then orphan cleanup returns the donor to a clean
/// physical state
/// Run with: cargo test --test end_to_end_tests

use std::collections::HashMap;
use std::sync::Arc;

use memshard::{
    CachedRouter, ChunkCatalog, ChunkRange, ClusterVersionCoordinator, Document, FcvTag,
    ID_FIELD, InMemoryMetadataStore, InMemoryReplication, InMemoryStorageEngine, KeyBound,
    MigrationCoordinator, MigrationDeps, MigrationPhase, RangeDeleter, ShardEndpoint, ShardId,
    ShardNode, ShardRegistry, ShardingConfig, Value,
};

fn doc(id: i64, x: i64) -> Document {
    Document::new().with(ID_FIELD, id).with("x", x)
}

fn range(min: i64, max: i64) -> ChunkRange {
    ChunkRange::new(KeyBound::value(min), KeyBound::value(max)).unwrap()
}

#[tokio::test]
async fn test_migration_with_source_ops_end_to_end() {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let replication = InMemoryReplication::new();
    let catalog = Arc::new(ChunkCatalog::open(metadata.clone()).await.unwrap());
    let fcv = ClusterVersionCoordinator::open(metadata.clone(), replication.clone(), FcvTag::new(8, 0))
        .await
        .unwrap();

    let registry = ShardRegistry::open(metadata.clone()).await.unwrap();
    registry
        .add_shard(ShardId::new("shard0"), ShardEndpoint::new("localhost", 27018))
        .await
        .unwrap();
    registry
        .add_shard(ShardId::new("shard1"), ShardEndpoint::new("localhost", 27019))
        .await
        .unwrap();

    let storage0 = Arc::new(InMemoryStorageEngine::new());
    let shard0 = ShardNode::new(
        ShardId::new("shard0"),
        storage0.clone(),
        catalog.clone(),
        replication.clone(),
    );
    let shard1 = ShardNode::new(
        ShardId::new("shard1"),
        Arc::new(InMemoryStorageEngine::new()),
        catalog.clone(),
        replication.clone(),
    );

    let ns = "test.coll".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();
    catalog
        .split(
            &ns,
            &ChunkRange::full(),
            vec![Value::Integer(0), Value::Integer(20), Value::Integer(40)],
        )
        .await
        .unwrap();

    // 5 documents in [0, 20) and 10 in [20, 40), all on shard0.
    for x in [1, 5, 9, 13, 17] {
        shard0.insert(&ns, doc(x, x)).await.unwrap();
    }
    for x in [20, 22, 24, 26, 28, 30, 32, 34, 36, 38] {
        shard0.insert(&ns, doc(x, x)).await.unwrap();
    }

    let deps = MigrationDeps {
        catalog: catalog.clone(),
        metadata: metadata.clone(),
        replication: replication.clone(),
        fcv: fcv.clone(),
        config: ShardingConfig::default(),
    };
    let mut migration = MigrationCoordinator::start(
        deps,
        shard0.clone(),
        shard1.clone(),
        &ns,
        &range(20, 40),
        ShardId::new("shard0"),
        ShardId::new("shard1"),
    )
    .await
    .unwrap();
    assert_eq!(migration.step().await.unwrap(), MigrationPhase::Cloning);

    // Live traffic during the clone: 5 deletes, 2 inserts, and 2 updates
    // split across the migrating and non-migrating ranges.
    for x in [20, 24, 28, 36] {
        assert!(shard0.delete(&ns, &Value::Integer(x)).await.unwrap());
    }
    assert!(shard0.delete(&ns, &Value::Integer(9)).await.unwrap());
    shard0.insert(&ns, doc(3, 3)).await.unwrap();
    shard0.insert(&ns, doc(7, 7)).await.unwrap();
    shard0
        .update(&ns, doc(30, 30).with("status", "updated"))
        .await
        .unwrap();
    shard0
        .update(&ns, doc(13, 13).with("status", "updated"))
        .await
        .unwrap();

    migration.run().await.unwrap();

    // Routing: [20, 40) now belongs to shard1, the rest stays on shard0.
    assert_eq!(
        catalog.lookup(&ns, &Value::Integer(25)).await.unwrap(),
        ShardId::new("shard1")
    );
    assert_eq!(
        catalog.lookup(&ns, &Value::Integer(13)).await.unwrap(),
        ShardId::new("shard0")
    );

    // 6 documents visible per shard, exactly one updated doc on each side.
    let on_donor = shard0.find(&ns).await.unwrap();
    let on_recipient = shard1.find(&ns).await.unwrap();
    assert_eq!(on_donor.len(), 6);
    assert_eq!(on_recipient.len(), 6);

    let donor_updated: Vec<_> = on_donor
        .iter()
        .filter(|d| d.get("status") == Some(&Value::Text("updated".into())))
        .collect();
    assert_eq!(donor_updated.len(), 1);
    assert_eq!(donor_updated[0].get("x"), Some(&Value::Integer(13)));

    let recipient_updated: Vec<_> = on_recipient
        .iter()
        .filter(|d| d.get("status") == Some(&Value::Text("updated".into())))
        .collect();
    assert_eq!(recipient_updated.len(), 1);
    assert_eq!(recipient_updated[0].get("x"), Some(&Value::Integer(30)));

    // The donor still physically carries the 6 orphans plus its own 6.
    assert_eq!(shard0.find_unfiltered(&ns).await.unwrap().len(), 12);

    // A router sees exactly the 12 owned documents, never the orphans.
    let mut nodes = HashMap::new();
    nodes.insert(ShardId::new("shard0"), shard0.clone());
    nodes.insert(ShardId::new("shard1"), shard1.clone());
    let router = CachedRouter::new(catalog.clone(), nodes);
    assert_eq!(router.find_all(&ns).await.unwrap().len(), 12);

    // Orphan cleanup: the commit scheduled exactly the migrated range.
    let deleter = RangeDeleter::new(
        metadata.clone(),
        storage0.clone(),
        catalog.clone(),
        replication.clone(),
        ShardingConfig::default(),
    );
    let tasks = deleter.pending_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].range, range(20, 40));
    assert_eq!(tasks[0].num_orphan_docs, 6);

    deleter.drain_ready().await.unwrap();
    assert!(deleter.pending_tasks().await.unwrap().is_empty());
    assert_eq!(shard0.find_unfiltered(&ns).await.unwrap().len(), 6);
    assert_eq!(router.find_all(&ns).await.unwrap().len(), 12);
}
