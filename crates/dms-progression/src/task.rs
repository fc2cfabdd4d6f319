use std::sync::Arc;
use std::time::Duration;

use dms_db::OrderStore;
use dms_schemas::{OrderId, OrderStatus, OrderUpdate};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::lifecycle;
use crate::notify::{publish_best_effort, Notifier};
use crate::registry::ReleaseOnDrop;

/// How a progression task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// Reached `delivered` after `transitions` writes by this task.
    Delivered { transitions: u32 },
    /// Stored status was `cancelled` at a tick; one cancellation update was published.
    ObservedCancellation,
    /// Stop signal from the registry.
    Stopped,
    /// Process-wide shutdown signal.
    Shutdown,
    /// Stored status at start was outside the lifecycle, or already final.
    NothingToProgress(String),
    /// Stored status moved to something other than what this task last saw.
    Superseded(String),
    NotFound,
    /// Storage read or write failed; the task stopped without retrying.
    StoreFailed,
}

pub(crate) struct ProgressionTask {
    pub(crate) order_id: OrderId,
    pub(crate) generation: u64,
    pub(crate) store: Arc<dyn OrderStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) tick: Duration,
    pub(crate) stop: oneshot::Receiver<()>,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) _release: ReleaseOnDrop,
}

/// Outcome of one storage read.
enum Read {
    Status(String),
    Exit(TaskExit),
}

impl ProgressionTask {
    pub(crate) async fn run(mut self) -> TaskExit {
        let exit = self.drive().await;
        match &exit {
            TaskExit::StoreFailed => {
                warn!(
                    order_id = self.order_id,
                    generation = self.generation,
                    "progression ended on store failure"
                )
            }
            other => {
                info!(
                    order_id = self.order_id,
                    generation = self.generation,
                    exit = ?other,
                    "progression ended"
                )
            }
        }
        // `_release` drops with `self` here, removing the handle if it is still ours.
        exit
    }

    async fn drive(&mut self) -> TaskExit {
        let raw = match self.read().await {
            Read::Status(s) => s,
            Read::Exit(exit) => return exit,
        };

        let mut observed = match OrderStatus::parse(&raw) {
            Some(status) if lifecycle::successor(status).is_some() => status,
            Some(_) => return TaskExit::NothingToProgress(raw),
            None if raw.trim().is_empty() => match self.normalize(&raw).await {
                Ok(status) => status,
                Err(exit) => return exit,
            },
            None => return TaskExit::NothingToProgress(raw),
        };

        let mut transitions = 0u32;
        while let Some(next) = lifecycle::successor(observed) {
            tokio::select! {
                biased;
                _ = &mut self.stop => return TaskExit::Stopped,
                _ = wait_for_shutdown(&mut self.shutdown) => return TaskExit::Shutdown,
                _ = tokio::time::sleep(self.tick) => {}
            }

            let current = match self.read().await {
                Read::Status(s) => s,
                Read::Exit(exit) => return exit,
            };
            if current == OrderStatus::Cancelled.as_str() {
                self.publish(OrderStatus::Cancelled);
                return TaskExit::ObservedCancellation;
            }
            if current != observed.as_str() {
                return TaskExit::Superseded(current);
            }
            // A stop or shutdown that landed during the read still wins.
            if let Some(exit) = self.signalled() {
                return exit;
            }

            match self.store.write_status_if(self.order_id, observed.as_str(), next).await {
                Ok(true) => {
                    transitions += 1;
                    observed = next;
                    debug!(order_id = self.order_id, status = %next, "order advanced");
                    self.publish(next);
                }
                Ok(false) => return self.on_write_conflict().await,
                Err(e) => {
                    warn!(
                        order_id = self.order_id,
                        error = %format!("{e:#}"),
                        "status write failed"
                    );
                    return TaskExit::StoreFailed;
                }
            }
        }

        TaskExit::Delivered { transitions }
    }

    async fn read(&self) -> Read {
        match self.store.read_status(self.order_id).await {
            Ok(Some(s)) => Read::Status(s),
            Ok(None) => Read::Exit(TaskExit::NotFound),
            Err(e) => {
                warn!(order_id = self.order_id, error = %format!("{e:#}"), "status read failed");
                Read::Exit(TaskExit::StoreFailed)
            }
        }
    }

    /// An empty stored status is parked at the start of the lifecycle.
    async fn normalize(&self, raw: &str) -> Result<OrderStatus, TaskExit> {
        let first = lifecycle::LIFECYCLE[0];
        match self.store.write_status_if(self.order_id, raw, first).await {
            Ok(true) => {
                info!(order_id = self.order_id, "empty status normalised to created");
                self.publish(first);
                Ok(first)
            }
            Ok(false) => Err(self.on_write_conflict().await),
            Err(e) => {
                warn!(order_id = self.order_id, error = %format!("{e:#}"), "status write failed");
                Err(TaskExit::StoreFailed)
            }
        }
    }

    /// The conditional write matched nothing: the row changed under us.
    async fn on_write_conflict(&self) -> TaskExit {
        match self.read().await {
            Read::Status(s) if s == OrderStatus::Cancelled.as_str() => {
                self.publish(OrderStatus::Cancelled);
                TaskExit::ObservedCancellation
            }
            Read::Status(s) => TaskExit::Superseded(s),
            Read::Exit(exit) => exit,
        }
    }

    /// Non-blocking check of both signals.
    fn signalled(&mut self) -> Option<TaskExit> {
        match self.stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Closed) => return Some(TaskExit::Stopped),
        }
        if *self.shutdown.borrow() {
            return Some(TaskExit::Shutdown);
        }
        None
    }

    fn publish(&self, status: OrderStatus) {
        publish_best_effort(self.notifier.as_ref(), OrderUpdate::new(self.order_id, status));
    }
}

/// Resolves once shutdown is raised or the registry is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|down| *down).await;
}
