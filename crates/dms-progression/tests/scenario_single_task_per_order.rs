//! Scenario: at most one progression task per order.
//!
//! # Invariants under test
//!
//! 1. N concurrent `start` calls for one order spawn exactly one task.
//! 2. `stop` immediately followed by `start` never leaves two handles, and the
//!    stopped task's late release does not remove the new task's handle.
//! 3. `stop` on an order with no task is a no-op.

use std::sync::Arc;
use std::time::Duration;

use dms_progression::{ProgressionConfig, ProgressionRegistry, TaskExit};
use dms_schemas::NewOrder;
use dms_testkit::{wait_until, MemoryOrderStore, OrderStore, RecordingNotifier};

fn registry_with(store: Arc<MemoryOrderStore>, tick: Duration) -> ProgressionRegistry {
    ProgressionRegistry::new(
        store,
        Arc::new(RecordingNotifier::new()),
        ProgressionConfig { tick },
    )
}

async fn created_order(store: &MemoryOrderStore) -> anyhow::Result<i64> {
    let o = store
        .create_order(&NewOrder {
            customer_id: 9,
            item: "chair".to_string(),
        })
        .await?;
    Ok(o.id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_spawn_exactly_one_task() -> anyhow::Result<()> {
    let store = Arc::new(MemoryOrderStore::new());
    let registry = registry_with(store.clone(), Duration::from_secs(60));
    let id = created_order(&store).await?;

    let barrier = Arc::new(tokio::sync::Barrier::new(64));
    let mut joins = Vec::new();
    for _ in 0..64 {
        let registry = registry.clone();
        let barrier = Arc::clone(&barrier);
        joins.push(tokio::spawn(async move {
            barrier.wait().await;
            registry.start(id)
        }));
    }

    let mut spawned = 0;
    for j in joins {
        if j.await? {
            spawned += 1;
        }
    }
    assert_eq!(spawned, 1, "exactly one start may win");
    assert_eq!(registry.active_count(), 1);

    let report = registry.shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.exits, vec![(id, TaskExit::Shutdown)]);
    assert_eq!(report.aborted, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_then_start_never_holds_two_handles() -> anyhow::Result<()> {
    let store = Arc::new(MemoryOrderStore::new());
    let registry = registry_with(store.clone(), Duration::from_secs(60));
    let id = created_order(&store).await?;

    assert!(registry.start(id));
    assert!(registry.stop(id));
    assert!(!registry.is_running(id), "stop removes the handle synchronously");
    assert!(registry.start(id), "a fresh start after stop is allowed");
    assert_eq!(registry.active_count(), 1);

    // Let the stopped task observe its signal and run its release.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(
        registry.is_running(id),
        "the old task's release must not remove the new handle"
    );
    assert_eq!(registry.active_count(), 1);

    let report = registry.shutdown(Duration::from_secs(1)).await;
    let mut exits: Vec<TaskExit> = report.exits.into_iter().map(|(_, e)| e).collect();
    exits.sort_by_key(|e| format!("{e:?}"));
    assert_eq!(exits, vec![TaskExit::Shutdown, TaskExit::Stopped]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_without_task_is_a_noop() -> anyhow::Result<()> {
    let store = Arc::new(MemoryOrderStore::new());
    let registry = registry_with(store.clone(), Duration::from_millis(50));
    let id = created_order(&store).await?;

    assert!(!registry.stop(id));
    assert!(!registry.stop(424_242));
    assert_eq!(registry.active_count(), 0);

    // Stop twice after one start: second call finds nothing.
    assert!(registry.start(id));
    assert!(registry.stop(id));
    assert!(!registry.stop(id));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stopped_task_never_writes_again() -> anyhow::Result<()> {
    let store = Arc::new(MemoryOrderStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = ProgressionRegistry::new(
        store.clone(),
        notifier.clone(),
        ProgressionConfig {
            tick: Duration::from_millis(50),
        },
    );
    let id = created_order(&store).await?;

    assert!(registry.start(id));
    tokio::time::sleep(Duration::from_millis(75)).await;
    assert_eq!(store.read_status(id).await?.as_deref(), Some("dispatched"));

    assert!(registry.stop(id));
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(store.read_status(id).await?.as_deref(), Some("dispatched"));
    assert_eq!(notifier.updates().len(), 1);
    assert!(wait_until(Duration::from_millis(10), || registry.active_count() == 0).await);
    Ok(())
}
