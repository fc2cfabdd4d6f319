//! Best-effort order update publishing.

use std::marker::PhantomData;

use anyhow::{anyhow, Result};
use dms_schemas::{OrderUpdate, ORDER_UPDATES_TOPIC};
use tokio::sync::broadcast;
use tracing::debug;

/// Outbound sink for [`OrderUpdate`]s on [`ORDER_UPDATES_TOPIC`].
///
/// Implementations may fail; the controller never retries and never lets a
/// failure affect progression.
pub trait Notifier: Send + Sync {
    fn publish(&self, update: &OrderUpdate) -> Result<()>;
}

/// Publishes onto a `tokio::sync::broadcast` channel whose message type can be
/// built from an [`OrderUpdate`] (e.g. an SSE bus enum).
///
/// A send with no live subscribers is reported as an error.
pub struct BroadcastNotifier<M> {
    tx: broadcast::Sender<M>,
    _msg: PhantomData<fn() -> M>,
}

impl<M> BroadcastNotifier<M> {
    pub fn new(tx: broadcast::Sender<M>) -> Self {
        Self {
            tx,
            _msg: PhantomData,
        }
    }
}

impl<M> Notifier for BroadcastNotifier<M>
where
    M: From<OrderUpdate> + Clone + Send + 'static,
{
    fn publish(&self, update: &OrderUpdate) -> Result<()> {
        self.tx
            .send(M::from(*update))
            .map(|_| ())
            .map_err(|_| anyhow!("no subscribers on {ORDER_UPDATES_TOPIC}"))
    }
}

/// Publish and swallow any failure.
pub(crate) fn publish_best_effort(notifier: &dyn Notifier, update: OrderUpdate) {
    if let Err(e) = notifier.publish(&update) {
        debug!(
            order_id = update.order_id,
            status = %update.status,
            error = %e,
            "order update not published"
        );
    }
}
