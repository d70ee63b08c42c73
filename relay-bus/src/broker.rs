//! Broker traits
//!
//! A broker hosts named, session-enabled queues. Consumers never receive from a
//! queue directly: they accept a session (all messages sharing one
//! `session_id`), which locks it to them, and then read that session's
//! messages strictly in order.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BusError;
use crate::message::{OutgoingMessage, ReceivedMessage};

#[async_trait]
pub trait SessionBroker: Send + Sync {
    /// Enqueues a message on `queue`
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<(), BusError>;

    /// Locks the next session that has pending messages
    ///
    /// Waits at most `max_wait` and then fails with
    /// `BusError::NoSessionAvailable`, so callers never hold an idle
    /// connection open.
    async fn accept_next_session(
        &self,
        queue: &str,
        max_wait: Duration,
    ) -> Result<Arc<dyn SessionReceiver>, BusError>;
}

#[async_trait]
pub trait SessionReceiver: Send + Sync {
    fn session_id(&self) -> &str;

    /// Next message of the session, or `None` if nothing arrives within `max_wait`
    async fn receive(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>, BusError>;

    /// Removes a delivered message from the queue
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), BusError>;

    /// Returns a delivered message to the front of its session for redelivery
    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), BusError>;

    /// Extends the session lock by the broker's lock duration
    async fn renew_lock(&self) -> Result<(), BusError>;

    /// Releases the session; an unsettled message becomes available again
    async fn close(&self);
}
