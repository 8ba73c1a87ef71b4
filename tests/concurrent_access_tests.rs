/// Concurrent access tests
///
/// Parallel increments, persists racing with increments, and the dirty-flag
/// contract: a save only clears dirtiness when nothing changed after its
/// snapshot was taken.
/// Run with: cargo test --test concurrent_access_tests

mod support;

use durable_counter::{EngineConfig, FileStore, NoopMetrics, PersistOutcome, PersistenceEngine};
use std::sync::Arc;
use std::time::Duration;
use support::{GatedStore, counter_path, visits_on_disk};
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> EngineConfig {
    EngineConfig::new(counter_path(dir.path()))
        .retry_delay(Duration::from_millis(1))
        .persist_interval(Duration::from_secs(3600))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(PersistenceEngine::open(config_for(&temp_dir)).await.unwrap());

    let num_tasks = 16;
    let increments_per_task = 500;
    let mut handles = vec![];
    for _ in 0..num_tasks {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for _ in 0..increments_per_task {
                engine.increment();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(engine.get_value(), num_tasks * increments_per_task);
    engine.shutdown().await.unwrap();
    assert_eq!(
        visits_on_disk(&counter_path(temp_dir.path())),
        Some(num_tasks * increments_per_task)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_increments_from_os_threads() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        counter_path(temp_dir.path()),
        r#"{"visits": 1000, "last_updated": "2024-05-01T10:00:00Z", "version": "1.0.0"}"#,
    )
    .unwrap();
    let engine = Arc::new(PersistenceEngine::open(config_for(&temp_dir)).await.unwrap());

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for _ in 0..250 {
                    engine.increment();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(engine.get_value(), 1000 + 8 * 250);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persist_racing_with_increments_ends_with_latest_value() {
    let temp_dir = TempDir::new().unwrap();
    let path = counter_path(temp_dir.path());
    let engine = Arc::new(PersistenceEngine::open(config_for(&temp_dir)).await.unwrap());

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for _ in 0..20 {
                engine.persist().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let mut counters = vec![];
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        counters.push(tokio::spawn(async move {
            for _ in 0..200 {
                engine.increment();
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in counters {
        handle.await.unwrap();
    }
    writer.await.unwrap();

    engine.persist().await.unwrap();
    assert!(!engine.is_dirty());
    assert_eq!(visits_on_disk(&path), Some(800));
}

// Strict clean rule: the in-flight save wrote the older snapshot, so the
// counter must stay dirty until a later save captures the increment that
// landed during the write.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_increment_during_save_keeps_counter_dirty() {
    let temp_dir = TempDir::new().unwrap();
    let path = counter_path(temp_dir.path());
    let config = config_for(&temp_dir);
    let (store, gate) = GatedStore::new(FileStore::new(&config.path, config.permissions));
    let engine = Arc::new(
        PersistenceEngine::open_with(config, Arc::new(store), Arc::new(NoopMetrics))
            .await
            .unwrap(),
    );

    engine.increment();
    let in_flight = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.persist().await })
    };

    let entered = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || entered.wait()).await.unwrap();
    engine.increment();
    let released = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || released.wait()).await.unwrap();

    let outcome = in_flight.await.unwrap().unwrap();
    assert_eq!(outcome, PersistOutcome::Saved { visits: 1 });
    assert_eq!(visits_on_disk(&path), Some(1));
    assert!(engine.is_dirty());
    assert_eq!(engine.last_persisted_value(), 1);

    assert_eq!(engine.persist().await.unwrap(), PersistOutcome::Saved { visits: 2 });
    assert!(!engine.is_dirty());
    assert_eq!(visits_on_disk(&path), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_persist_calls_write_once() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&temp_dir);
    let (store, gate) = GatedStore::new(FileStore::new(&config.path, config.permissions));
    let engine = Arc::new(
        PersistenceEngine::open_with(config, Arc::new(store), Arc::new(NoopMetrics))
            .await
            .unwrap(),
    );

    engine.add(5);
    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.persist().await })
    };
    let entered = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || entered.wait()).await.unwrap();

    // queued behind the persist lock while the first save is parked
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.persist().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let released = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || released.wait()).await.unwrap();

    assert_eq!(first.await.unwrap().unwrap(), PersistOutcome::Saved { visits: 5 });
    assert_eq!(second.await.unwrap().unwrap(), PersistOutcome::Clean);
}

// Shutdown waits for a background save that is already writing, then runs
// its own flush for whatever changed during that write.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_waits_for_in_flight_background_save() {
    let temp_dir = TempDir::new().unwrap();
    let path = counter_path(temp_dir.path());
    let config = config_for(&temp_dir).persist_interval(Duration::from_millis(10));
    let (store, gate) = GatedStore::new(FileStore::new(&config.path, config.permissions));
    let engine = Arc::new(
        PersistenceEngine::open_with(config, Arc::new(store), Arc::new(NoopMetrics))
            .await
            .unwrap(),
    );

    engine.increment();
    let entered = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || entered.wait()).await.unwrap();
    engine.increment();

    let shutdown = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!shutdown.is_finished());
    assert_eq!(visits_on_disk(&path), None);

    let released = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || released.wait()).await.unwrap();

    let outcome = shutdown.await.unwrap().unwrap();
    assert_eq!(outcome, PersistOutcome::Saved { visits: 2 });
    assert_eq!(visits_on_disk(&path), Some(2));
    assert!(!engine.is_dirty());
}
