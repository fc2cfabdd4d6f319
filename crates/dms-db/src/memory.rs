use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use dms_schemas::{NewOrder, Order, OrderId, OrderStatus};
use tracing::debug;

use crate::{CancelOutcome, OrderStore};

/// In-process [`OrderStore`] with the same semantics as the Postgres one.
///
/// Used by the daemon's `store.backend: memory` mode and by tests. All state
/// sits behind one mutex, so each call is atomic like a single SQL statement.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    last_id: OrderId,
    orders: BTreeMap<OrderId, Order>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory order store mutex poisoned"))
    }

    /// Insert a row with an arbitrary raw status (including ones no writer
    /// would produce). Returns the stored order.
    pub fn seed(&self, customer_id: i64, item: &str, raw_status: &str) -> Result<Order> {
        let mut g = self.lock()?;
        g.last_id += 1;
        let now = Utc::now();
        let order = Order {
            id: g.last_id,
            customer_id,
            item: item.to_string(),
            status: raw_status.to_string(),
            created_at: now,
            updated_at: now,
        };
        g.orders.insert(order.id, order.clone());
        Ok(order)
    }
}

fn newest_first(mut v: Vec<Order>) -> Vec<Order> {
    v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    v
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_order(&self, new: &NewOrder) -> Result<Order> {
        self.seed(new.customer_id, &new.item, OrderStatus::Created.as_str())
    }

    async fn fetch_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.lock()?.orders.get(&id).cloned())
    }

    async fn read_status(&self, id: OrderId) -> Result<Option<String>> {
        Ok(self.lock()?.orders.get(&id).map(|o| o.status.clone()))
    }

    async fn write_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        let mut g = self.lock()?;
        let Some(order) = g.orders.get_mut(&id) else {
            bail!("update_order_status: order {id} not found");
        };
        order.status = status.as_str().to_string();
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn write_status_if(
        &self,
        id: OrderId,
        expected: &str,
        next: OrderStatus,
    ) -> Result<bool> {
        let mut g = self.lock()?;
        match g.orders.get_mut(&id) {
            Some(order) if order.status == expected => {
                order.status = next.as_str().to_string();
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => {
                debug!(
                    order_id = id,
                    expected,
                    next = %next,
                    "conditional status write matched no row"
                );
                Ok(false)
            }
        }
    }

    async fn cancel_order(&self, id: OrderId) -> Result<CancelOutcome> {
        let mut g = self.lock()?;
        let Some(order) = g.orders.get_mut(&id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if order.parsed_status().is_some_and(|s| s.is_terminal()) {
            debug!(
                order_id = id,
                status = %order.status,
                "cancel refused: order already final"
            );
            return Ok(CancelOutcome::AlreadyTerminal(order.status.clone()));
        }
        order.status = OrderStatus::Cancelled.as_str().to_string();
        order.updated_at = Utc::now();
        Ok(CancelOutcome::Cancelled)
    }

    async fn list_orders(&self, customer_id: Option<i64>) -> Result<Vec<Order>> {
        let g = self.lock()?;
        let rows = g
            .orders
            .values()
            .filter(|o| customer_id.map_or(true, |c| o.customer_id == c))
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }

    async fn list_orders_in_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let g = self.lock()?;
        let rows = g
            .orders
            .values()
            .filter(|o| statuses.iter().any(|s| s.as_str() == o.status))
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }
}
