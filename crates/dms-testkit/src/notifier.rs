use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use dms_progression::Notifier;
use dms_schemas::{OrderId, OrderStatus, OrderUpdate};

/// Keeps every published update in order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    updates: Mutex<Vec<OrderUpdate>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<OrderUpdate> {
        self.updates.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Statuses published for one order, in publish order.
    pub fn statuses_for(&self, order_id: OrderId) -> Vec<OrderStatus> {
        self.updates()
            .into_iter()
            .filter(|u| u.order_id == order_id)
            .map(|u| u.status)
            .collect()
    }

    pub fn count(&self, order_id: OrderId, status: OrderStatus) -> usize {
        self.statuses_for(order_id)
            .into_iter()
            .filter(|s| *s == status)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, update: &OrderUpdate) -> Result<()> {
        if let Ok(mut v) = self.updates.lock() {
            v.push(*update);
        }
        Ok(())
    }
}

/// Fails every publish and counts the attempts.
#[derive(Debug, Default)]
pub struct FailingNotifier {
    attempts: AtomicUsize,
}

impl FailingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Notifier for FailingNotifier {
    fn publish(&self, _update: &OrderUpdate) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        bail!("notification sink unavailable")
    }
}
