//! Shared order types for the delivery management workspace.
//!
//! These types cross crate boundaries (storage, progression controller, HTTP
//! API, SSE stream) and are `Serialize + Deserialize`. No I/O lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary key of an order row (Postgres `bigserial`).
pub type OrderId = i64;

/// Fixed name of the outbound topic carrying [`OrderUpdate`] payloads.
pub const ORDER_UPDATES_TOPIC: &str = "orders:updates";

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Every status an order row can legitimately hold.
///
/// `Created → Dispatched → InTransit → Delivered` is the lifecycle a
/// background progression walks; `Cancelled` is only ever written by an
/// external cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Dispatched,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status string. Anything outside the known set is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(OrderStatus::Created),
            "dispatched" => Some(OrderStatus::Dispatched),
            "in_transit" => Some(OrderStatus::InTransit),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order rows
// ---------------------------------------------------------------------------

/// One order as stored.
///
/// `status` stays a raw string: a row may carry a value this build does not
/// recognise, and readers must be able to see it rather than fail the read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: i64,
    pub item: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Typed view of `status`, if recognised.
    pub fn parsed_status(&self) -> Option<OrderStatus> {
        OrderStatus::parse(&self.status)
    }
}

/// Insert payload; new rows always start at [`OrderStatus::Created`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: i64,
    pub item: String,
}

// ---------------------------------------------------------------------------
// OrderUpdate
// ---------------------------------------------------------------------------

/// Payload published on [`ORDER_UPDATES_TOPIC`] whenever an order changes status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

impl OrderUpdate {
    pub fn new(order_id: OrderId, status: OrderStatus) -> Self {
        Self { order_id, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_are_stable() {
        for s in [
            OrderStatus::Created,
            OrderStatus::Dispatched,
            OrderStatus::InTransit,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse(""), None);
        assert_eq!(OrderStatus::parse("IN_TRANSIT"), None);
    }

    #[test]
    fn only_delivered_and_cancelled_are_terminal() {
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Created.is_terminal());
        assert!(!OrderStatus::InTransit.is_terminal());
    }

    #[test]
    fn update_payload_matches_wire_shape() {
        let json = serde_json::to_value(OrderUpdate::new(7, OrderStatus::InTransit)).unwrap();
        assert_eq!(json, serde_json::json!({"order_id": 7, "status": "in_transit"}));
    }
}
