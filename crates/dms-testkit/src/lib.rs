//! Test doubles shared by the workspace's scenario tests.
//!
//! - [`RecordingNotifier`] / [`FailingNotifier`]: observe or break publishing.
//! - [`FaultyStore`]: wraps any [`OrderStore`] and injects read/write failures,
//!   panics, reads parked mid-call, and a concurrent cancellation right
//!   before a task's write.
//! - [`wait_until`]: poll a condition; works with tokio's paused clock.

mod notifier;
mod store;

pub use notifier::{FailingNotifier, RecordingNotifier};
pub use store::FaultyStore;

use std::time::Duration;

pub use dms_db::{MemoryOrderStore, OrderStore};

/// Poll `cond` every millisecond until it holds or `timeout` elapses.
/// Returns the final value of `cond`.
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
