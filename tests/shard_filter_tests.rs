/// Shard version filter tests
///
/// Orphan exclusion on every read path, the missing-shard-key edge case,
/// and StaleConfig enforcement at the data shard
/// Run with: cargo test --test shard_filter_tests

use std::collections::HashMap;
use std::sync::Arc;

use memshard::{
    CachedRouter, ChunkCatalog, ChunkRange, ChunkVersion, Document, ID_FIELD,
    InMemoryMetadataStore, InMemoryReplication, InMemoryStorageEngine, KeyBound, ShardError,
    ShardId, ShardNode, Value,
};

struct Fixture {
    catalog: Arc<ChunkCatalog>,
    shard0: Arc<ShardNode>,
    shard1: Arc<ShardNode>,
}

impl Fixture {
    /// Two shards; `test.items` sharded on `x`, split at 0 and 100 with
    /// `[0, 100)` owned by shard0 and the rest by shard1.
    async fn new() -> Self {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let replication = InMemoryReplication::new();
        let catalog = Arc::new(ChunkCatalog::open(metadata.clone()).await.unwrap());
        let ns = "test.items".to_string();
        catalog
            .shard_collection(&ns, "x", ShardId::new("shard1"))
            .await
            .unwrap();
        catalog
            .split(&ns, &ChunkRange::full(), vec![Value::Integer(0), Value::Integer(100)])
            .await
            .unwrap();
        let mid = ChunkRange::new(KeyBound::value(0), KeyBound::value(100)).unwrap();
        let entry = catalog.entry_for_range(&ns, &mid).await.unwrap();
        catalog
            .apply_ownership_change(&ns, &mid, ShardId::new("shard0"), &entry.version)
            .await
            .unwrap();

        let shard0 = ShardNode::new(
            ShardId::new("shard0"),
            Arc::new(InMemoryStorageEngine::new()),
            catalog.clone(),
            replication.clone(),
        );
        let shard1 = ShardNode::new(
            ShardId::new("shard1"),
            Arc::new(InMemoryStorageEngine::new()),
            catalog.clone(),
            replication.clone(),
        );
        Self {
            catalog,
            shard0,
            shard1,
        }
    }
}

fn doc(id: i64, x: i64) -> Document {
    Document::new().with(ID_FIELD, id).with("x", x)
}

#[tokio::test]
async fn test_orphan_excluded_from_reads_but_physically_present() {
    let fixture = Fixture::new().await;
    let ns = "test.items".to_string();
    fixture.shard0.insert(&ns, doc(1, 50)).await.unwrap();

    // The range moves away; the document is now an orphan on shard0.
    let mid = ChunkRange::new(KeyBound::value(0), KeyBound::value(100)).unwrap();
    let entry = fixture.catalog.entry_for_range(&ns, &mid).await.unwrap();
    fixture
        .catalog
        .apply_ownership_change(&ns, &mid, ShardId::new("shard1"), &entry.version)
        .await
        .unwrap();

    assert_eq!(fixture.shard0.find_unfiltered(&ns).await.unwrap().len(), 1);
    assert!(fixture.shard0.find(&ns).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_shard_key_always_kept() {
    let fixture = Fixture::new().await;
    let ns = "test.items".to_string();
    fixture
        .shard0
        .insert(&ns, Document::new().with(ID_FIELD, 7).with("note", "keyless"))
        .await
        .unwrap();

    let found = fixture.shard0.find(&ns).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("note"), Some(&Value::Text("keyless".into())));
}

#[tokio::test]
async fn test_search_results_filtered_before_return() {
    let fixture = Fixture::new().await;
    let ns = "test.items".to_string();

    // Results handed back by an external index: one owned document, one
    // orphan, one without a shard key. Only the orphan is dropped.
    let external = vec![
        doc(1, 50),
        doc(2, 150),
        Document::new().with(ID_FIELD, 3),
    ];
    let kept = fixture
        .shard0
        .filter()
        .filter_results(&ns, external)
        .await
        .unwrap();
    let ids: Vec<&Value> = kept.iter().map(|d| d.get(ID_FIELD).unwrap()).collect();
    assert_eq!(ids, vec![&Value::Integer(1), &Value::Integer(3)]);
}

#[tokio::test]
async fn test_stale_shard_version_rejected_at_data_shard() {
    let fixture = Fixture::new().await;
    let ns = "test.items".to_string();
    let stale = fixture.catalog.collection_version(&ns).await.unwrap();

    // A migration-style ownership change bumps the collection's major
    // version; the old routed version must now be refused.
    let mid = ChunkRange::new(KeyBound::value(0), KeyBound::value(100)).unwrap();
    let entry = fixture.catalog.entry_for_range(&ns, &mid).await.unwrap();
    fixture
        .catalog
        .apply_ownership_change(&ns, &mid, ShardId::new("shard1"), &entry.version)
        .await
        .unwrap();

    let err = fixture
        .shard0
        .query_with_version(&ns, &stale)
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::StaleConfig(_, _)));
    assert!(err.is_transient());

    let current = fixture.catalog.collection_version(&ns).await.unwrap();
    fixture.shard0.query_with_version(&ns, &current).await.unwrap();
}

#[tokio::test]
async fn test_cross_epoch_version_is_stale() {
    let fixture = Fixture::new().await;
    let ns = "test.items".to_string();
    let current = fixture.catalog.collection_version(&ns).await.unwrap();
    let foreign_epoch = ChunkVersion::initial(uuid::Uuid::new_v4());
    let from_other_life = ChunkVersion {
        epoch: foreign_epoch.epoch,
        major: current.major,
        minor: current.minor,
    };

    let err = fixture
        .shard0
        .query_with_version(&ns, &from_other_life)
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::StaleConfig(_, _)));
}

#[tokio::test]
async fn test_router_refreshes_on_stale_config() {
    let fixture = Fixture::new().await;
    let ns = "test.items".to_string();
    fixture.shard0.insert(&ns, doc(1, 50)).await.unwrap();
    fixture.shard1.insert(&ns, doc(2, 150)).await.unwrap();

    let mut nodes = HashMap::new();
    nodes.insert(ShardId::new("shard0"), fixture.shard0.clone());
    nodes.insert(ShardId::new("shard1"), fixture.shard1.clone());
    let router = CachedRouter::new(fixture.catalog.clone(), nodes);

    // Warm the cache, then move the range underneath it.
    assert_eq!(router.find_all(&ns).await.unwrap().len(), 2);
    let mid = ChunkRange::new(KeyBound::value(0), KeyBound::value(100)).unwrap();
    let entry = fixture.catalog.entry_for_range(&ns, &mid).await.unwrap();
    fixture
        .catalog
        .apply_ownership_change(&ns, &mid, ShardId::new("shard1"), &entry.version)
        .await
        .unwrap();

    // The stale cache trips StaleConfig at the shard; the router refreshes
    // and retries, and the orphan on shard0 stays invisible.
    let docs = router.find_all(&ns).await.unwrap();
    let ids: Vec<&Value> = docs.iter().map(|d| d.get(ID_FIELD).unwrap()).collect();
    assert_eq!(ids, vec![&Value::Integer(2)]);
    assert_eq!(
        router.route_key(&ns, &Value::Integer(50)).await.unwrap(),
        ShardId::new("shard1")
    );
}
