//! Scheduler layer for the runner
//!
//! Starts the worker tasks that each consume resource requests, and watches
//! them so the process reports itself unhealthy once every worker has died.

pub mod pool;
pub mod watchdog;

pub use pool::WorkerPool;
pub use watchdog::{Liveness, check_runners};
