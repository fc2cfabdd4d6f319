//! Scenario: an uncancelled order walks the whole lifecycle.
//!
//! # Invariants under test
//!
//! 1. An order started at `created` reaches `delivered` after exactly three
//!    transitions, one per tick, none skipped or repeated.
//! 2. Every write is the immediate successor of the status the task last
//!    observed, and each write is followed by one update in the same order.
//! 3. The handle is gone once the task ends.
//!
//! Runs on tokio's paused clock; no DB or network required.

use std::sync::Arc;
use std::time::Duration;

use dms_progression::{ProgressionConfig, ProgressionRegistry, TaskExit};
use dms_schemas::{NewOrder, OrderStatus};
use dms_testkit::{wait_until, FaultyStore, MemoryOrderStore, OrderStore, RecordingNotifier};

const TICK: Duration = Duration::from_millis(100);

fn lamp() -> NewOrder {
    NewOrder {
        customer_id: 1,
        item: "lamp".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn created_order_reaches_delivered_in_three_ticks() -> anyhow::Result<()> {
    let store = Arc::new(FaultyStore::new(Arc::new(MemoryOrderStore::new())));
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = ProgressionRegistry::new(
        store.clone(),
        notifier.clone(),
        ProgressionConfig { tick: TICK },
    );

    let order = store.create_order(&lamp()).await?;
    let started_at = tokio::time::Instant::now();
    assert!(registry.start(order.id));
    assert!(registry.is_running(order.id));

    // Half way into the second tick exactly one transition has happened.
    tokio::time::sleep(TICK + TICK / 2).await;
    assert_eq!(store.read_status(order.id).await?.as_deref(), Some("dispatched"));
    assert_eq!(notifier.statuses_for(order.id), vec![OrderStatus::Dispatched]);

    assert!(wait_until(Duration::from_secs(5), || !registry.is_running(order.id)).await);
    let elapsed = started_at.elapsed();
    assert!(elapsed >= TICK * 3, "three full ticks must elapse, got {elapsed:?}");
    assert!(elapsed < TICK * 4, "no extra tick after delivery, got {elapsed:?}");

    assert_eq!(store.read_status(order.id).await?.as_deref(), Some("delivered"));
    assert_eq!(
        notifier.statuses_for(order.id),
        vec![
            OrderStatus::Dispatched,
            OrderStatus::InTransit,
            OrderStatus::Delivered
        ]
    );
    assert_eq!(
        store.writes(),
        vec![
            (order.id, "created".to_string(), OrderStatus::Dispatched),
            (order.id, "dispatched".to_string(), OrderStatus::InTransit),
            (order.id, "in_transit".to_string(), OrderStatus::Delivered),
        ]
    );

    let report = registry.shutdown(Duration::from_secs(1)).await;
    assert_eq!(
        report.exits,
        vec![(order.id, TaskExit::Delivered { transitions: 3 })]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn order_resumed_mid_lifecycle_continues_from_stored_status() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = ProgressionRegistry::new(
        memory.clone(),
        notifier.clone(),
        ProgressionConfig { tick: TICK },
    );

    let order = memory.seed(4, "crate", "in_transit")?;
    assert_eq!(registry.resume([order.id]), 1);

    assert!(wait_until(Duration::from_secs(5), || !registry.is_running(order.id)).await);
    assert_eq!(memory.read_status(order.id).await?.as_deref(), Some("delivered"));
    assert_eq!(notifier.statuses_for(order.id), vec![OrderStatus::Delivered]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn independent_orders_progress_independently() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = ProgressionRegistry::new(
        memory.clone(),
        notifier.clone(),
        ProgressionConfig { tick: TICK },
    );

    let a = memory.create_order(&lamp()).await?;
    let b = memory.create_order(&lamp()).await?;
    assert_eq!(registry.resume([a.id, b.id]), 2);
    assert_eq!(registry.active_orders(), vec![a.id, b.id]);

    // Cancel `a` mid-tick, out from under its task; `b` must be unaffected.
    tokio::time::sleep(TICK / 2).await;
    memory.cancel_order(a.id).await?;

    assert!(wait_until(Duration::from_secs(5), || registry.active_count() == 0).await);
    assert_eq!(memory.read_status(a.id).await?.as_deref(), Some("cancelled"));
    assert_eq!(memory.read_status(b.id).await?.as_deref(), Some("delivered"));
    assert_eq!(notifier.statuses_for(a.id), vec![OrderStatus::Cancelled]);
    assert_eq!(notifier.statuses_for(b.id).len(), 3);
    Ok(())
}
