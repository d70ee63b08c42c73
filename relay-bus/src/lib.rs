//! Relay Bus
//!
//! Session queue plumbing shared by the resource processor and the deployment
//! status updater.
//!
//! This crate contains:
//! - Broker traits: `SessionBroker` and `SessionReceiver`, the seam a
//!   networked broker plugs into
//! - An in-process session broker with peek-lock delivery and dead-lettering
//! - The auto lock renewer that keeps a session alive during long work
//! - The session consumer loop both queue consumers run

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod renewer;

pub use broker::{SessionBroker, SessionReceiver};
pub use consumer::{ConsumerSettings, Disposition, MessageHandler, SessionConsumer};
pub use error::BusError;
pub use memory::{BrokerSettings, InMemoryBroker};
pub use message::{OutgoingMessage, ReceivedMessage};
pub use renewer::AutoLockRenewer;
