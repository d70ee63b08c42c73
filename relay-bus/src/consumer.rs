//! Session consumer loop
//!
//! Both queue consumers (the resource processor workers and the deployment
//! status updater) run the same loop: accept the next available session with a
//! short wait, keep its lock renewed, hand each message to a handler strictly
//! in order and settle it as the handler decides. Errors never end the loop.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span};

use crate::broker::{SessionBroker, SessionReceiver};
use crate::error::BusError;
use crate::message::ReceivedMessage;
use crate::renewer::AutoLockRenewer;

/// How a handled message is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue
    Complete,
    /// Put the message back for redelivery
    Abandon,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> Disposition;
}

/// Timing of a session consumer
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue: String,
    /// How long to wait for a session before looping again
    pub session_wait: Duration,
    /// How long an accepted session may stay idle before it is released
    pub message_wait: Duration,
    /// Upper bound on how long one session lock is kept alive
    pub max_lock_renewal: Duration,
    pub renew_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl ConsumerSettings {
    pub fn new(queue: impl Into<String>, max_lock_renewal: Duration) -> Self {
        Self {
            queue: queue.into(),
            session_wait: Duration::from_secs(1),
            message_wait: Duration::from_secs(1),
            max_lock_renewal,
            renew_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// Drives one handler from one queue
pub struct SessionConsumer {
    name: String,
    broker: Arc<dyn SessionBroker>,
    handler: Arc<dyn MessageHandler>,
    settings: ConsumerSettings,
}

impl SessionConsumer {
    pub fn new(
        name: impl Into<String>,
        broker: Arc<dyn SessionBroker>,
        handler: Arc<dyn MessageHandler>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            broker,
            handler,
            settings,
        }
    }

    /// Runs until `shutdown` turns true
    ///
    /// Shutdown is only observed between sessions, so a message being handled
    /// is always settled first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("{} consuming from '{}'", self.name, self.settings.queue);
        let mut last_heartbeat: Option<Instant> = None;

        while !*shutdown.borrow_and_update() {
            if last_heartbeat.is_none_or(|at| at.elapsed() >= self.settings.heartbeat_interval) {
                info!("{}: Looking for new session...", self.name);
                last_heartbeat = Some(Instant::now());
            }

            match self.process_next_session().await {
                Ok(processed) => debug!("{}: session finished after {} message(s)", self.name, processed),
                Err(BusError::NoSessionAvailable(_)) => debug!("{}: no sessions available", self.name),
                Err(e) if e.is_transient() => debug!("{}: transient broker error: {}", self.name, e),
                Err(e) => {
                    error!("{}: error while receiving: {}", self.name, e);
                    tokio::time::sleep(self.settings.session_wait).await;
                }
            }
        }

        info!("{} stopped", self.name);
    }

    /// Accepts one session and handles its messages until it is idle
    ///
    /// Returns how many messages were handled.
    pub async fn process_next_session(&self) -> Result<usize, BusError> {
        let receiver = self
            .broker
            .accept_next_session(&self.settings.queue, self.settings.session_wait)
            .await?;

        let span = info_span!(
            "session",
            consumer = %self.name,
            session_id = %receiver.session_id()
        );

        async {
            info!("Accepted session");
            let renewer = AutoLockRenewer::register(
                Arc::clone(&receiver),
                self.settings.max_lock_renewal,
                self.settings.renew_interval,
            );

            let result = self.drain(receiver.as_ref()).await;

            renewer.close();
            receiver.close().await;
            info!("Closed session");
            result
        }
        .instrument(span)
        .await
    }

    async fn drain(&self, receiver: &dyn SessionReceiver) -> Result<usize, BusError> {
        let mut processed = 0;

        while let Some(message) = receiver.receive(self.settings.message_wait).await? {
            debug!(
                "Message {} received (delivery {})",
                message.sequence_number, message.delivery_count
            );

            match self.handler.handle(&message).await {
                Disposition::Complete => receiver.complete(&message).await?,
                Disposition::Abandon => receiver.abandon(&message).await?,
            }
            processed += 1;
        }

        Ok(processed)
    }
}
