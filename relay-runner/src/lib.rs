//! Relay Runner
//!
//! The resource processor: a pool of workers that take resource requests off
//! the request queue, drive the deployment tool (porter) for them and report
//! progress and results on the deployment status queue.
//!
//! Architecture:
//! - Configuration: Settings loaded once from the environment
//! - Credential: The identity the deployment tool logs in with
//! - Command: Subprocess execution behind a trait
//! - Porter: Deployment tool command building and output parsing
//! - Services: `invoke_porter_action` and the request message handler
//! - Scheduler: The worker pool and the `check_runners` watchdog

pub mod command;
pub mod config;
pub mod credential;
pub mod error;
pub mod porter;
pub mod scheduler;
pub mod service;

pub use config::RunnerConfig;
pub use error::DeploymentError;
pub use scheduler::{Liveness, WorkerPool};
