//! Scenario: process-wide shutdown.
//!
//! # Invariants under test
//!
//! 1. Shutdown wakes every sleeping task; all are joined within the grace.
//! 2. No `start` succeeds once shutdown has begun.
//! 3. A second shutdown is a no-op.

use std::sync::Arc;
use std::time::Duration;

use dms_progression::{ProgressionConfig, ProgressionRegistry, TaskExit};
use dms_schemas::NewOrder;
use dms_testkit::{MemoryOrderStore, OrderStore, RecordingNotifier};

#[tokio::test(start_paused = true)]
async fn shutdown_joins_all_sleeping_tasks() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let registry = ProgressionRegistry::new(
        memory.clone(),
        notifier.clone(),
        ProgressionConfig {
            tick: Duration::from_secs(3600),
        },
    );

    let mut ids = Vec::new();
    for n in 0..5 {
        let o = memory
            .create_order(&NewOrder {
                customer_id: n + 1,
                item: format!("box-{n}"),
            })
            .await?;
        ids.push(o.id);
    }
    assert_eq!(registry.resume(ids.iter().copied()), 5);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let begun = tokio::time::Instant::now();
    let report = registry.shutdown(Duration::from_secs(1)).await;
    assert!(begun.elapsed() < Duration::from_secs(1), "tasks wake promptly");

    assert_eq!(report.aborted, 0);
    assert_eq!(report.panicked, 0);
    let mut exits = report.exits;
    exits.sort_by_key(|(id, _)| *id);
    let expected: Vec<_> = ids.iter().map(|id| (*id, TaskExit::Shutdown)).collect();
    assert_eq!(exits, expected);

    assert_eq!(registry.active_count(), 0);
    assert!(registry.is_shutting_down());
    assert!(notifier.updates().is_empty());
    for id in &ids {
        assert_eq!(memory.read_status(*id).await?.as_deref(), Some("created"));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn start_is_refused_after_shutdown() -> anyhow::Result<()> {
    let memory = Arc::new(MemoryOrderStore::new());
    let registry = ProgressionRegistry::new(
        memory.clone(),
        Arc::new(RecordingNotifier::new()),
        ProgressionConfig::default(),
    );
    let id = memory.seed(1, "kettle", "created")?.id;

    let first = registry.shutdown(Duration::from_millis(100)).await;
    assert!(first.exits.is_empty());

    assert!(!registry.start(id));
    assert!(!registry.is_running(id));
    assert_eq!(registry.resume([id]), 0);

    let second = registry.shutdown(Duration::from_millis(100)).await;
    assert!(second.exits.is_empty());
    assert_eq!(second.aborted, 0);
    Ok(())
}
