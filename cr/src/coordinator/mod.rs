//! Reload coordinator
//!
//! One task owns all coordinator state and handles requests from its inbox in
//! order. A reload request runs one build attempt on a blocking thread while
//! the task waits, so there is never more than one build in flight. Requests
//! for the same subject already queued when an attempt starts are answered
//! with that attempt's result instead of building again.

mod attempt;
mod config;
mod core;
mod handle;
mod messages;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use handle::CoordinatorHandle;
pub use messages::{CoordRequest, CoordinatorMetrics};
