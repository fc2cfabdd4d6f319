//! The fixed lifecycle a progression task advances through.

use dms_schemas::OrderStatus;

/// Ordered non-cancelled statuses. `Cancelled` is deliberately absent: it is
/// reachable only through an external cancellation.
pub const LIFECYCLE: [OrderStatus; 4] = [
    OrderStatus::Created,
    OrderStatus::Dispatched,
    OrderStatus::InTransit,
    OrderStatus::Delivered,
];

/// Index of `status` within [`LIFECYCLE`], or `None` for `Cancelled`.
pub fn position(status: OrderStatus) -> Option<usize> {
    LIFECYCLE.iter().position(|s| *s == status)
}

/// The status that immediately follows `status`, if any.
pub fn successor(status: OrderStatus) -> Option<OrderStatus> {
    let i = position(status)?;
    LIFECYCLE.get(i + 1).copied()
}
