use anyhow::Result;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use pharma_guard::core_modules::route_assigner::LocationPoolEntry;
use pharma_guard::storage::{LedgerStore, MemoryStore, SqliteStore};
use pharma_guard::{EngineConfig, GuardError, IntegrityEngine, NewBatch};

fn small_pool(size: u32) -> Vec<LocationPoolEntry> {
    (1..=size)
        .map(|id| LocationPoolEntry {
            id,
            name: format!("Depot {id}"),
            latitude: 27.0 + f64::from(id) / 10.0,
            longitude: 85.0 - f64::from(id) / 10.0,
        })
        .collect()
}

fn engine_over(store: Arc<dyn LedgerStore>, seed: u64) -> IntegrityEngine {
    IntegrityEngine::new(
        store,
        EngineConfig {
            rng_seed: Some(seed),
            ..EngineConfig::default()
        },
    )
}

#[tokio::test]
async fn full_pool_route_is_a_relabelled_permutation() -> Result<()> {
    let pool = small_pool(5);
    let engine = engine_over(Arc::new(MemoryStore::with_pool(pool.clone())), 5);
    let batch = engine.create_batch(NewBatch::new("Insulin", 2.0, 8.0)).await?;

    let route = engine.assign_route(&batch.id, 5).await?;
    assert_eq!(route.len(), 5);
    assert_eq!(
        route.iter().map(|def| def.ordinal).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    let drawn: HashSet<u32> = route.iter().map(|def| def.location_id).collect();
    assert_eq!(drawn, (1..=5).collect::<HashSet<u32>>());

    let origin = &route[0];
    assert!(origin.name.contains("Manufacturer Dispatch"));
    assert!(pool
        .iter()
        .any(|entry| entry.latitude == origin.latitude && entry.longitude == origin.longitude));
    for def in &route[1..] {
        assert!(pool.iter().any(|entry| entry.name == def.name));
    }
    Ok(())
}

#[tokio::test]
async fn oversized_request_leaves_no_partial_route() -> Result<()> {
    let engine = engine_over(Arc::new(MemoryStore::with_pool(small_pool(3))), 7);
    let batch = engine.create_batch(NewBatch::new("Insulin", 2.0, 8.0)).await?;

    let error = engine.assign_route(&batch.id, 4).await.expect_err("pool too small");
    assert!(matches!(
        error,
        GuardError::InsufficientPool { requested: 4, available: 3 }
    ));
    assert!(engine.get_route(&batch.id).await?.is_empty());

    // A fitting request afterwards still succeeds.
    assert_eq!(engine.assign_route(&batch.id, 3).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn route_is_assigned_once() -> Result<()> {
    let engine = engine_over(Arc::new(MemoryStore::new()), 9);
    let batch = engine.create_batch(NewBatch::new("Insulin", 2.0, 8.0)).await?;

    let first = engine.assign_route(&batch.id, 4).await?;
    let again = engine.assign_route(&batch.id, 6).await?;
    assert_eq!(first, again);
    assert_eq!(engine.assign_default_route(&batch.id).await?, first);
    Ok(())
}

#[tokio::test]
async fn invalid_route_requests() -> Result<()> {
    let engine = engine_over(Arc::new(MemoryStore::new()), 11);
    let missing = pharma_guard::BatchId::from("PG-BATCH-00C0FFEE");
    assert!(matches!(
        engine.assign_route(&missing, 3).await,
        Err(GuardError::BatchNotFound(_))
    ));

    let batch = engine.create_batch(NewBatch::new("Insulin", 2.0, 8.0)).await?;
    assert!(matches!(
        engine.assign_route(&batch.id, 0).await,
        Err(GuardError::EmptyRoute)
    ));
    Ok(())
}

async fn racing_callers_agree(store: Arc<dyn LedgerStore>) -> Result<()> {
    // Independently seeded engines draw different candidate routes.
    let engines: Vec<Arc<IntegrityEngine>> = (0..8)
        .map(|seed| Arc::new(engine_over(store.clone(), 100 + seed)))
        .collect();
    let batch = engines[0]
        .create_batch(NewBatch::new("Insulin", 2.0, 8.0))
        .await?;

    let calls = engines.iter().map(|engine| {
        let engine = engine.clone();
        let id = batch.id.clone();
        tokio::spawn(async move { engine.assign_route(&id, 5).await })
    });
    let mut routes = Vec::new();
    for joined in join_all(calls).await {
        routes.push(joined??);
    }

    let stored = engines[0].get_route(&batch.id).await?;
    assert_eq!(stored.len(), 5);
    assert!(routes.iter().all(|route| *route == stored));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignment_agrees_in_memory() -> Result<()> {
    racing_callers_agree(Arc::new(MemoryStore::new())).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignment_agrees_on_sqlite() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStore::open(dir.path().join("routes.db")).await?;
    racing_callers_agree(Arc::new(store)).await
}

#[tokio::test]
async fn sqlite_pool_is_the_district_table() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStore::open(dir.path().join("pool.db")).await?;
    let engine = engine_over(Arc::new(store), 13);
    let pool = engine.location_pool().await?;
    assert!(pool.len() >= 75);
    assert!(pool.iter().any(|entry| entry.name == "Kathmandu"));
    assert!(pool.windows(2).all(|pair| pair[0].name <= pair[1].name));
    Ok(())
}
