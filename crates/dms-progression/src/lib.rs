//! Order progression controller.
//!
//! One background task per active order walks it through
//! `created → dispatched → in_transit → delivered`, one step per tick.
//! [`ProgressionRegistry`] owns the "at most one task per order" invariant
//! and is the only entry point for starting and stopping tasks.
//!
//! # Consistency with storage
//!
//! A task never trusts its own notion of the order's status across a sleep.
//! Before every transition it re-reads the stored status; a `cancelled`
//! written by anyone (HTTP handler, CLI, another process) ends the task
//! within one tick. Each advance is a conditional write keyed on the status
//! the task last observed, so a concurrent cancellation can never be
//! overwritten by a late advance.
//!
//! # Failure policy
//!
//! Storage errors end the affected task (fail-stop, no retry). Publish
//! failures are logged at `debug` and otherwise ignored.

pub mod lifecycle;
pub mod notify;
mod registry;
mod task;

pub use notify::{BroadcastNotifier, Notifier};
pub use registry::{ProgressionConfig, ProgressionRegistry, ShutdownReport};
pub use task::TaskExit;
