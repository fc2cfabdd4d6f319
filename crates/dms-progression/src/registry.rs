use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use dms_db::OrderStore;
use dms_schemas::{OrderId, OrderStatus, OrderUpdate};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::notify::{publish_best_effort, Notifier};
use crate::task::{ProgressionTask, TaskExit};

// ---------------------------------------------------------------------------
// Config / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionConfig {
    /// Fixed delay between two lifecycle transitions.
    pub tick: Duration,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
        }
    }
}

/// Outcome of [`ProgressionRegistry::shutdown`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Tasks joined (including ones that had already finished), with how they ended.
    pub exits: Vec<(OrderId, TaskExit)>,
    /// Tasks that panicked.
    pub panicked: usize,
    /// Tasks still running when the grace period ran out.
    pub aborted: usize,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One live progression. Dropping it (or sending on `stop`) stops the task.
struct ControllerHandle {
    generation: u64,
    stop: oneshot::Sender<()>,
}

struct Inner {
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    config: ProgressionConfig,
    /// order id -> live handle. Every check-and-insert / check-and-remove
    /// happens under this one lock.
    handles: Mutex<HashMap<OrderId, ControllerHandle>>,
    next_generation: AtomicU64,
    shutdown: watch::Sender<bool>,
    /// `None` once shutdown has taken the set.
    tasks: Mutex<Option<JoinSet<(OrderId, TaskExit)>>>,
}

impl Inner {
    fn lock_handles(&self) -> MutexGuard<'_, HashMap<OrderId, ControllerHandle>> {
        // Map entries are replaced whole, so a poisoned map is still consistent.
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Option<JoinSet<(OrderId, TaskExit)>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove `order_id` only if its handle is still the one from `generation`.
    fn release(&self, order_id: OrderId, generation: u64) -> bool {
        let mut handles = self.lock_handles();
        match handles.get(&order_id) {
            Some(h) if h.generation == generation => {
                handles.remove(&order_id);
                true
            }
            _ => false,
        }
    }
}

/// Process-wide map from order id to its running progression task.
///
/// Cheap to clone; all clones share one map. Owned by the composition root and
/// handed to whoever needs to start or stop progression.
///
/// Dropping the last clone aborts every task still running. Use
/// [`ProgressionRegistry::shutdown`] for an orderly stop.
#[derive(Clone)]
pub struct ProgressionRegistry {
    inner: Arc<Inner>,
}

impl ProgressionRegistry {
    pub fn new(
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        config: ProgressionConfig,
    ) -> Self {
        let (shutdown, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                config,
                handles: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutdown,
                tasks: Mutex::new(Some(JoinSet::new())),
            }),
        }
    }

    /// Start progression for `order_id` unless a task is already running.
    ///
    /// Returns `true` when a new task was spawned, `false` when one already
    /// exists or the registry is shutting down. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self, order_id: OrderId) -> bool {
        let mut handles = self.inner.lock_handles();
        if handles.contains_key(&order_id) {
            debug!(order_id, "progression already running");
            return false;
        }

        let mut tasks = self.inner.lock_tasks();
        let Some(set) = tasks.as_mut() else {
            debug!(order_id, "progression refused: registry shut down");
            return false;
        };

        // Reap tasks that have already finished so the set does not grow unbounded.
        while set.try_join_next().is_some() {}

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        handles.insert(
            order_id,
            ControllerHandle {
                generation,
                stop: stop_tx,
            },
        );

        let task = ProgressionTask {
            order_id,
            generation,
            store: Arc::clone(&self.inner.store),
            notifier: Arc::clone(&self.inner.notifier),
            tick: self.inner.config.tick,
            stop: stop_rx,
            shutdown: self.inner.shutdown.subscribe(),
            _release: ReleaseOnDrop {
                registry: Arc::downgrade(&self.inner),
                order_id,
                generation,
            },
        };
        set.spawn(async move { (order_id, task.run().await) });

        info!(order_id, generation, "progression started");
        true
    }

    /// Signal and forget the task for `order_id`, if any.
    ///
    /// Returns `true` when a running task was found. Once this returns, a new
    /// [`start`](Self::start) for the same id may legitimately spawn a fresh task.
    pub fn stop(&self, order_id: OrderId) -> bool {
        let mut handles = self.inner.lock_handles();
        let Some(handle) = handles.remove(&order_id) else {
            return false;
        };
        let generation = handle.generation;
        // Err means the task already ended; the removal above is what matters.
        let _ = handle.stop.send(());
        drop(handles);

        info!(order_id, generation, "progression stopped");
        true
    }

    /// Publish an update directly, whether or not a task is running.
    pub fn publish_now(&self, order_id: OrderId, status: OrderStatus) {
        publish_best_effort(
            self.inner.notifier.as_ref(),
            OrderUpdate::new(order_id, status),
        );
    }

    /// Start every id in `order_ids`; returns how many tasks were spawned.
    pub fn resume<I>(&self, order_ids: I) -> usize
    where
        I: IntoIterator<Item = OrderId>,
    {
        order_ids.into_iter().filter(|id| self.start(*id)).count()
    }

    pub fn is_running(&self, order_id: OrderId) -> bool {
        self.inner.lock_handles().contains_key(&order_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock_handles().len()
    }

    /// Ids with a live handle, ascending.
    pub fn active_orders(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self.inner.lock_handles().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Raise the shutdown signal, refuse further starts, and join every task.
    ///
    /// Tasks observe the signal at their next wait. Anything still running
    /// after `grace` is aborted. A second call returns an empty report.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.inner.shutdown.send_replace(true);

        let Some(mut set) = self.inner.lock_tasks().take() else {
            return ShutdownReport::default();
        };

        let mut report = ShutdownReport::default();
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(exit))) => report.exits.push(exit),
                Ok(Some(Err(e))) => {
                    if e.is_panic() {
                        report.panicked += 1;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    report.aborted = set.len();
                    warn!(aborted = report.aborted, "progression tasks exceeded shutdown grace");
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    break;
                }
            }
        }

        info!(
            joined = report.exits.len(),
            panicked = report.panicked,
            aborted = report.aborted,
            "progression registry shut down"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Release guard
// ---------------------------------------------------------------------------

/// Releases the task's handle however the task ends (return, panic, abort).
pub(crate) struct ReleaseOnDrop {
    registry: Weak<Inner>,
    order_id: OrderId,
    generation: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            if inner.release(self.order_id, self.generation) {
                debug!(order_id = self.order_id, generation = self.generation, "handle released");
            }
        }
    }
}
