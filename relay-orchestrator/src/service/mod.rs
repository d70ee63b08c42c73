//! Service Module
//!
//! Business logic of the control plane: starting operations (the request
//! sender), advancing them as status updates arrive (the status updater) and
//! computing the resource each pipeline step deploys.

pub mod queue;
pub mod request_sender;
pub mod status_updater;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

pub use queue::{QueueError, RequestQueue};
pub use request_sender::{ResourceRequestSender, SendError};
pub use status_updater::{DeploymentStatusUpdater, StepNotFoundError, UpdateError};
