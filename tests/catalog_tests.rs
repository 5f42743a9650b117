/// Chunk catalog tests
///
/// Partition invariant, version CAS, split/merge, and durable recovery
/// Run with: cargo test --test catalog_tests

use std::sync::Arc;

use memshard::{
    ChunkCatalog, ChunkRange, InMemoryMetadataStore, KeyBound, ShardError, ShardId, Value,
};

async fn fresh_catalog() -> (Arc<InMemoryMetadataStore>, Arc<ChunkCatalog>) {
    let store = Arc::new(InMemoryMetadataStore::new());
    let catalog = Arc::new(ChunkCatalog::open(store.clone()).await.unwrap());
    (store, catalog)
}

fn range(min: i64, max: i64) -> ChunkRange {
    ChunkRange::new(KeyBound::value(min), KeyBound::value(max)).unwrap()
}

/// Deterministic xorshift generator so the random-operation sequence is
/// reproducible without a seed dependency.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[tokio::test]
async fn test_shard_collection_creates_full_space_chunk() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();

    catalog.verify_partition(&ns).await.unwrap();
    assert_eq!(
        catalog.lookup(&ns, &Value::Integer(i64::MIN)).await.unwrap(),
        ShardId::new("shard0")
    );
    assert_eq!(
        catalog.lookup(&ns, &Value::Null).await.unwrap(),
        ShardId::new("shard0")
    );
}

#[tokio::test]
async fn test_lookup_routes_after_split() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();
    catalog
        .split(&ns, &ChunkRange::full(), vec![Value::Integer(0), Value::Integer(100)])
        .await
        .unwrap();

    let mid = range(0, 100);
    let entry = catalog.entry_for_range(&ns, &mid).await.unwrap();
    catalog
        .apply_ownership_change(&ns, &mid, ShardId::new("shard1"), &entry.version)
        .await
        .unwrap();

    assert_eq!(
        catalog.lookup(&ns, &Value::Integer(-5)).await.unwrap(),
        ShardId::new("shard0")
    );
    assert_eq!(
        catalog.lookup(&ns, &Value::Integer(50)).await.unwrap(),
        ShardId::new("shard1")
    );
    assert_eq!(
        catalog.lookup(&ns, &Value::Integer(100)).await.unwrap(),
        ShardId::new("shard0")
    );
}

#[tokio::test]
async fn test_ownership_cas_rejects_stale_version() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();

    let entry = catalog
        .entry_for_range(&ns, &ChunkRange::full())
        .await
        .unwrap();
    catalog
        .apply_ownership_change(&ns, &entry.range, ShardId::new("shard1"), &entry.version)
        .await
        .unwrap();

    // Same expected version again: the chunk has moved on.
    let err = catalog
        .apply_ownership_change(&ns, &entry.range, ShardId::new("shard2"), &entry.version)
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::StaleVersion(_)));
    assert_eq!(
        catalog.lookup(&ns, &Value::Integer(0)).await.unwrap(),
        ShardId::new("shard1")
    );
}

#[tokio::test]
async fn test_concurrent_cas_exactly_one_wins() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();
    let entry = catalog
        .entry_for_range(&ns, &ChunkRange::full())
        .await
        .unwrap();

    let mut handles = vec![];
    for i in 0..4 {
        let catalog = catalog.clone();
        let ns = ns.clone();
        let entry = entry.clone();
        handles.push(tokio::spawn(async move {
            catalog
                .apply_ownership_change(
                    &ns,
                    &entry.range,
                    ShardId::new(format!("shard{}", i + 1)),
                    &entry.version,
                )
                .await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn test_split_rejects_unordered_points() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();

    let err = catalog
        .split(
            &ns,
            &ChunkRange::full(),
            vec![Value::Integer(50), Value::Integer(50)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::InvalidSplitPoint(_)));
    assert_eq!(
        catalog.collection_snapshot(&ns).await.unwrap().chunk_count(),
        1
    );
}

#[tokio::test]
async fn test_catalog_recovers_from_metadata_store() {
    let (store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();
    catalog
        .split(&ns, &ChunkRange::full(), vec![Value::Integer(25)])
        .await
        .unwrap();
    let before = catalog.collection_snapshot(&ns).await.unwrap();

    let reopened = ChunkCatalog::open(store).await.unwrap();
    let after = reopened.collection_snapshot(&ns).await.unwrap();
    assert_eq!(after.collection_version, before.collection_version);
    assert_eq!(after.chunk_count(), before.chunk_count());
    reopened.verify_partition(&ns).await.unwrap();
}

#[tokio::test]
async fn test_partition_invariant_under_random_operations() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    let shards = [ShardId::new("shard0"), ShardId::new("shard1"), ShardId::new("shard2")];
    catalog
        .shard_collection(&ns, "x", shards[0].clone())
        .await
        .unwrap();

    let mut rng = XorShift(0x9E3779B97F4A7C15);
    for round in 0..200 {
        let snapshot = catalog.collection_snapshot(&ns).await.unwrap();
        let chunks: Vec<_> = snapshot.chunks.values().cloned().collect();
        let pick = chunks[(rng.next() as usize) % chunks.len()].clone();

        if rng.next() % 2 == 0 {
            // Split at a point strictly inside the picked chunk, if one exists.
            let candidate = Value::Integer((rng.next() % 10_000) as i64 - 5_000);
            if pick.range.contains(&candidate)
                && KeyBound::Value(candidate.clone()) != pick.range.min
            {
                catalog.split(&ns, &pick.range, vec![candidate]).await.unwrap();
            }
        } else {
            let target = shards[(rng.next() as usize) % shards.len()].clone();
            if target != pick.owning_shard {
                catalog
                    .apply_ownership_change(&ns, &pick.range, target, &pick.version)
                    .await
                    .unwrap();
            }
        }

        catalog
            .verify_partition(&ns)
            .await
            .unwrap_or_else(|err| panic!("partition broken after round {}: {}", round, err));
    }
}

#[tokio::test]
async fn test_merge_restores_single_chunk() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();
    catalog
        .split(
            &ns,
            &ChunkRange::full(),
            vec![Value::Integer(0), Value::Integer(50)],
        )
        .await
        .unwrap();

    catalog.merge(&ns, &ChunkRange::full()).await.unwrap();
    let snapshot = catalog.collection_snapshot(&ns).await.unwrap();
    assert_eq!(snapshot.chunk_count(), 1);
    catalog.verify_partition(&ns).await.unwrap();
}

#[tokio::test]
async fn test_merge_rejects_mixed_owners() {
    let (_store, catalog) = fresh_catalog().await;
    let ns = "test.items".to_string();
    catalog
        .shard_collection(&ns, "x", ShardId::new("shard0"))
        .await
        .unwrap();
    catalog
        .split(&ns, &ChunkRange::full(), vec![Value::Integer(0)])
        .await
        .unwrap();

    let low = ChunkRange::new(KeyBound::MinKey, KeyBound::value(0)).unwrap();
    let entry = catalog.entry_for_range(&ns, &low).await.unwrap();
    catalog
        .apply_ownership_change(&ns, &low, ShardId::new("shard1"), &entry.version)
        .await
        .unwrap();

    assert!(catalog.merge(&ns, &ChunkRange::full()).await.is_err());
}
