//! Service layer
//!
//! `DeploymentService` runs one request through the deployment tool and
//! reports on the status queue. `RequestHandler` adapts it to the session
//! consumer loop.

mod deployment;
mod handler;

pub use deployment::{DeploymentService, IN_PROGRESS_MESSAGE};
pub use handler::RequestHandler;
