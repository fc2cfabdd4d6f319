use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use dms_db::{CancelOutcome, OrderStore};
use dms_schemas::{NewOrder, Order, OrderId, OrderStatus};
use tokio::sync::watch;

/// [`OrderStore`] wrapper with switchable faults.
///
/// Every successful conditional write is logged so tests can check that a
/// task only ever wrote immediate successors.
pub struct FaultyStore {
    inner: Arc<dyn OrderStore>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    panic_on_read: AtomicBool,
    cancel_before_next_write: AtomicBool,
    /// `true` parks every `read_status` until released.
    hold_reads: watch::Sender<bool>,
    reads: AtomicUsize,
    writes: Mutex<Vec<(OrderId, String, OrderStatus)>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn OrderStore>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            panic_on_read: AtomicBool::new(false),
            cancel_before_next_write: AtomicBool::new(false),
            hold_reads: watch::channel(false).0,
            reads: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn panic_on_read(&self, on: bool) {
        self.panic_on_read.store(on, Ordering::SeqCst);
    }

    /// The next `write_status_if` first cancels the order through the inner
    /// store, as a concurrent request would, then attempts its own write.
    pub fn cancel_before_next_write(&self) {
        self.cancel_before_next_write.store(true, Ordering::SeqCst);
    }

    /// While on, every `read_status` (already counted in [`Self::reads`])
    /// waits inside the store until this is switched off again.
    pub fn hold_reads(&self, on: bool) {
        self.hold_reads.send_replace(on);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Successful conditional writes as `(order_id, expected, written)`.
    pub fn writes(&self) -> Vec<(OrderId, String, OrderStatus)> {
        self.writes.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OrderStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn create_order(&self, new: &NewOrder) -> Result<Order> {
        self.inner.create_order(new).await
    }

    async fn fetch_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.inner.fetch_order(id).await
    }

    async fn read_status(&self, id: OrderId) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_read.load(Ordering::SeqCst) {
            panic!("injected panic reading order {id}");
        }
        let held = *self.hold_reads.borrow();
        if held {
            let mut rx = self.hold_reads.subscribe();
            let _ = rx.wait_for(|held| !*held).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("injected read failure");
        }
        self.inner.read_status(id).await
    }

    async fn write_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure");
        }
        self.inner.write_status(id, status).await
    }

    async fn write_status_if(
        &self,
        id: OrderId,
        expected: &str,
        next: OrderStatus,
    ) -> Result<bool> {
        if self.cancel_before_next_write.swap(false, Ordering::SeqCst) {
            self.inner.cancel_order(id).await?;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure");
        }
        let applied = self.inner.write_status_if(id, expected, next).await?;
        if applied {
            if let Ok(mut v) = self.writes.lock() {
                v.push((id, expected.to_string(), next));
            }
        }
        Ok(applied)
    }

    async fn cancel_order(&self, id: OrderId) -> Result<CancelOutcome> {
        self.inner.cancel_order(id).await
    }

    async fn list_orders(&self, customer_id: Option<i64>) -> Result<Vec<Order>> {
        self.inner.list_orders(customer_id).await
    }

    async fn list_orders_in_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        self.inner.list_orders_in_status(statuses).await
    }
}
