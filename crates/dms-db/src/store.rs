use anyhow::Result;
use async_trait::async_trait;
use dms_schemas::{NewOrder, Order, OrderId, OrderStatus};
use sqlx::PgPool;

use crate::CancelOutcome;

/// Order persistence as seen by the HTTP layer and the progression controller.
///
/// # Contract
/// - `read_status` returns the raw stored string; `None` means the order does
///   not exist. Unrecognised strings are returned as-is.
/// - `write_status_if` is atomic with respect to other writers: it applies only
///   while the stored status still equals `expected`.
/// - `cancel_order` never overwrites `delivered` or `cancelled`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Short backend label for status endpoints and logs.
    fn backend_name(&self) -> &'static str;

    async fn create_order(&self, new: &NewOrder) -> Result<Order>;

    async fn fetch_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn read_status(&self, id: OrderId) -> Result<Option<String>>;

    async fn write_status(&self, id: OrderId, status: OrderStatus) -> Result<()>;

    async fn write_status_if(&self, id: OrderId, expected: &str, next: OrderStatus)
        -> Result<bool>;

    async fn cancel_order(&self, id: OrderId) -> Result<CancelOutcome>;

    /// All orders (`None`) or one customer's, newest first.
    async fn list_orders(&self, customer_id: Option<i64>) -> Result<Vec<Order>>;

    async fn list_orders_in_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>>;
}

/// [`OrderStore`] backed by the Postgres free functions in this crate.
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn create_order(&self, new: &NewOrder) -> Result<Order> {
        crate::insert_order(&self.pool, new).await
    }

    async fn fetch_order(&self, id: OrderId) -> Result<Option<Order>> {
        crate::fetch_order(&self.pool, id).await
    }

    async fn read_status(&self, id: OrderId) -> Result<Option<String>> {
        crate::fetch_order_status(&self.pool, id).await
    }

    async fn write_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        crate::update_order_status(&self.pool, id, status).await
    }

    async fn write_status_if(
        &self,
        id: OrderId,
        expected: &str,
        next: OrderStatus,
    ) -> Result<bool> {
        crate::update_order_status_if(&self.pool, id, expected, next).await
    }

    async fn cancel_order(&self, id: OrderId) -> Result<CancelOutcome> {
        crate::cancel_order(&self.pool, id).await
    }

    async fn list_orders(&self, customer_id: Option<i64>) -> Result<Vec<Order>> {
        match customer_id {
            Some(c) => crate::list_orders_by_customer(&self.pool, c).await,
            None => crate::list_all_orders(&self.pool).await,
        }
    }

    async fn list_orders_in_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        crate::list_orders_in_status(&self.pool, statuses).await
    }
}
