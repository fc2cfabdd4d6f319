//! Postgres persistence for orders.
//!
//! Free functions take a `&PgPool` and return `anyhow::Result`, one query per
//! function. [`OrderStore`] wraps the same operations behind a trait so the
//! progression controller and the HTTP layer can run against
//! [`MemoryOrderStore`] in tests and in the daemon's memory mode.

mod memory;
mod store;

pub use memory::MemoryOrderStore;
pub use store::{OrderStore, PgOrderStore};

use anyhow::{Context, Result};
use dms_schemas::{NewOrder, Order, OrderId, OrderStatus};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

pub const ENV_DB_URL: &str = "DMS_DATABASE_URL";

const ORDER_COLUMNS: &str = "id, customer_id, item, status, created_at, updated_at";

/// Connect to Postgres using DMS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 10).await
}

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    info!("order migrations applied");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
    })
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Result of [`cancel_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Row moved to `cancelled` by this call.
    Cancelled,
    /// Row was already `delivered` or `cancelled`; carries the stored status.
    AlreadyTerminal(String),
    NotFound,
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        item: row.try_get("item")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new order in `created` status.
pub async fn insert_order(pool: &PgPool, new: &NewOrder) -> Result<Order> {
    let row = sqlx::query(&format!(
        r#"
        insert into orders (customer_id, item, status)
        values ($1, $2, $3)
        returning {ORDER_COLUMNS}
        "#
    ))
    .bind(new.customer_id)
    .bind(&new.item)
    .bind(OrderStatus::Created.as_str())
    .fetch_one(pool)
    .await
    .context("insert_order failed")?;

    order_from_row(&row)
}

pub async fn fetch_order(pool: &PgPool, id: OrderId) -> Result<Option<Order>> {
    let row = sqlx::query(&format!("select {ORDER_COLUMNS} from orders where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("fetch_order failed")?;

    row.as_ref().map(order_from_row).transpose()
}

/// Stored status string, or `None` if the order does not exist.
pub async fn fetch_order_status(pool: &PgPool, id: OrderId) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("select status from orders where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("fetch_order_status failed")?;
    Ok(row.map(|(s,)| s))
}

/// Unconditional status write. Errors if the row does not exist.
pub async fn update_order_status(pool: &PgPool, id: OrderId, status: OrderStatus) -> Result<()> {
    let res = sqlx::query("update orders set status = $1, updated_at = now() where id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .context("update_order_status failed")?;

    if res.rows_affected() == 0 {
        anyhow::bail!("update_order_status: order {id} not found");
    }
    Ok(())
}

/// Conditional status write: applies only while the stored status still equals
/// `expected`. Returns whether the row was updated.
pub async fn update_order_status_if(
    pool: &PgPool,
    id: OrderId,
    expected: &str,
    next: OrderStatus,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update orders
        set status = $1,
            updated_at = now()
        where id = $2
          and status = $3
        "#,
    )
    .bind(next.as_str())
    .bind(id)
    .bind(expected)
    .execute(pool)
    .await
    .context("update_order_status_if failed")?;

    let applied = res.rows_affected() == 1;
    if !applied {
        debug!(
            order_id = id,
            expected,
            next = %next,
            "conditional status write matched no row"
        );
    }
    Ok(applied)
}

/// Cancel unless already delivered/cancelled.
pub async fn cancel_order(pool: &PgPool, id: OrderId) -> Result<CancelOutcome> {
    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        update orders
        set status = 'cancelled',
            updated_at = now()
        where id = $1
          and status not in ('delivered', 'cancelled')
        returning id
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("cancel_order update failed")?;

    if updated.is_some() {
        return Ok(CancelOutcome::Cancelled);
    }

    let outcome = match fetch_order_status(pool, id).await? {
        Some(status) => CancelOutcome::AlreadyTerminal(status),
        None => CancelOutcome::NotFound,
    };
    debug!(order_id = id, outcome = ?outcome, "cancel matched no live row");
    Ok(outcome)
}

pub async fn list_orders_by_customer(pool: &PgPool, customer_id: i64) -> Result<Vec<Order>> {
    let rows = sqlx::query(&format!(
        r#"
        select {ORDER_COLUMNS}
        from orders
        where customer_id = $1
        order by created_at desc, id desc
        "#
    ))
    .bind(customer_id)
    .fetch_all(pool)
    .await
    .context("list_orders_by_customer failed")?;

    rows.iter().map(order_from_row).collect()
}

pub async fn list_all_orders(pool: &PgPool) -> Result<Vec<Order>> {
    let rows = sqlx::query(&format!(
        "select {ORDER_COLUMNS} from orders order by created_at desc, id desc"
    ))
    .fetch_all(pool)
    .await
    .context("list_all_orders failed")?;

    rows.iter().map(order_from_row).collect()
}

/// Orders currently in any of `statuses`, newest first.
pub async fn list_orders_in_status(pool: &PgPool, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
    let wanted: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
    let rows = sqlx::query(&format!(
        r#"
        select {ORDER_COLUMNS}
        from orders
        where status = any($1)
        order by created_at desc, id desc
        "#
    ))
    .bind(wanted)
    .fetch_all(pool)
    .await
    .context("list_orders_in_status failed")?;

    rows.iter().map(order_from_row).collect()
}
