//! Scenario: storage and notification failures.
//!
//! # Invariants under test
//!
//! 1. A failed read or write ends the task without retry; the handle is
//!    released and the stored status is not touched again.
//! 2. A panicking task still releases its handle.
//! 3. Publish failures never stop or slow progression.

use std::sync::Arc;
use std::time::Duration;

use dms_progression::{ProgressionConfig, ProgressionRegistry, TaskExit};
use dms_schemas::{NewOrder, OrderStatus};
use dms_testkit::{
    wait_until, FailingNotifier, FaultyStore, MemoryOrderStore, OrderStore, RecordingNotifier,
};

const TICK: Duration = Duration::from_millis(100);

fn order() -> NewOrder {
    NewOrder {
        customer_id: 5,
        item: "shelf".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn read_failure_at_start_releases_handle() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let store = Arc::new(FaultyStore::new(memory.clone()));
    let notifier = Arc::new(RecordingNotifier::new());
    let registry =
        ProgressionRegistry::new(store.clone(), notifier.clone(), ProgressionConfig { tick: TICK });

    let id = memory.create_order(&order()).await?.id;
    store.fail_reads(true);
    assert!(registry.start(id));

    assert!(wait_until(Duration::from_secs(1), || !registry.is_running(id)).await);
    assert_eq!(store.reads(), 1, "no retry after a failed read");
    assert!(store.writes().is_empty());
    assert!(notifier.updates().is_empty());

    // The order can be picked up again once storage recovers.
    store.fail_reads(false);
    assert!(registry.start(id));
    tokio::time::sleep(TICK + TICK / 2).await;
    assert_eq!(memory.read_status(id).await?.as_deref(), Some("dispatched"));

    // The failed task was reaped by the second start; only the live one is joined.
    let report = registry.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.exits, vec![(id, TaskExit::Shutdown)]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn write_failure_mid_lifecycle_stops_the_task() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let store = Arc::new(FaultyStore::new(memory.clone()));
    let notifier = Arc::new(RecordingNotifier::new());
    let registry =
        ProgressionRegistry::new(store.clone(), notifier.clone(), ProgressionConfig { tick: TICK });

    let id = memory.create_order(&order()).await?.id;
    assert!(registry.start(id));

    tokio::time::sleep(TICK + TICK / 2).await;
    store.fail_writes(true);

    assert!(wait_until(Duration::from_secs(1), || !registry.is_running(id)).await);
    store.fail_writes(false);
    tokio::time::sleep(TICK * 5).await;

    assert_eq!(memory.read_status(id).await?.as_deref(), Some("dispatched"));
    assert_eq!(notifier.statuses_for(id), vec![OrderStatus::Dispatched]);

    let report = registry.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.exits, vec![(id, TaskExit::StoreFailed)]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn panicking_task_releases_its_handle() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let store = Arc::new(FaultyStore::new(memory.clone()));
    let registry = ProgressionRegistry::new(
        store.clone(),
        Arc::new(RecordingNotifier::new()),
        ProgressionConfig { tick: TICK },
    );

    let id = memory.create_order(&order()).await?.id;
    store.panic_on_read(true);
    assert!(registry.start(id));

    assert!(wait_until(Duration::from_secs(1), || !registry.is_running(id)).await);
    assert_eq!(registry.active_count(), 0);

    let report = registry.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.panicked, 1);
    assert!(report.exits.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn publish_failures_do_not_affect_progression() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let notifier = Arc::new(FailingNotifier::new());
    let registry = ProgressionRegistry::new(
        memory.clone(),
        notifier.clone(),
        ProgressionConfig { tick: TICK },
    );

    let id = memory.create_order(&order()).await?.id;
    let started_at = tokio::time::Instant::now();
    assert!(registry.start(id));

    assert!(wait_until(Duration::from_secs(5), || !registry.is_running(id)).await);
    assert!(started_at.elapsed() < TICK * 4);
    assert_eq!(memory.read_status(id).await?.as_deref(), Some("delivered"));
    assert_eq!(notifier.attempts(), 3, "one attempt per transition, no retries");

    let report = registry.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.exits, vec![(id, TaskExit::Delivered { transitions: 3 })]);
    Ok(())
}
