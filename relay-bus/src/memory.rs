//! In-process session broker
//!
//! Implements the broker traits on top of shared memory. Delivery follows
//! peek-lock semantics: a message is handed out under the session lock and
//! stays on the queue until it is completed. Abandoned messages go back to the
//! front of their session, become visible again after a backoff that grows
//! with each delivery, and are dead-lettered once they have been delivered
//! `max_delivery_count` times.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::broker::{SessionBroker, SessionReceiver};
use crate::error::BusError;
use crate::message::{OutgoingMessage, ReceivedMessage};

pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Lock and redelivery settings of the in-process broker
#[derive(Debug, Clone, Copy)]
pub struct BrokerSettings {
    pub lock_duration: Duration,
    pub max_delivery_count: u32,
    /// An abandoned message is hidden for this long times its delivery count
    pub redelivery_delay: Duration,
}

impl BrokerSettings {
    fn backoff(&self, delivery_count: u32) -> Duration {
        self.redelivery_delay.saturating_mul(delivery_count.max(1))
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            lock_duration: DEFAULT_LOCK_DURATION,
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
        }
    }
}

// ============================================================================
// State
// ============================================================================

struct StoredMessage {
    message: OutgoingMessage,
    sequence_number: u64,
    delivery_count: u32,
    /// Hidden from receivers until then
    available_at: Instant,
}

impl StoredMessage {
    fn to_received(&self) -> ReceivedMessage {
        ReceivedMessage {
            body: self.message.body.clone(),
            session_id: self.message.session_id.clone(),
            correlation_id: self.message.correlation_id.clone(),
            sequence_number: self.sequence_number,
            delivery_count: self.delivery_count,
        }
    }
}

struct SessionLock {
    token: u64,
    locked_until: Instant,
}

#[derive(Default)]
struct SessionState {
    pending: VecDeque<StoredMessage>,
    in_flight: Option<StoredMessage>,
    lock: Option<SessionLock>,
}

impl SessionState {
    fn is_locked(&self, now: Instant) -> bool {
        self.lock.as_ref().is_some_and(|lock| lock.locked_until > now)
    }

    fn next_message(&self) -> Option<&StoredMessage> {
        self.in_flight.as_ref().or(self.pending.front())
    }

    /// Drops the lock and puts an unsettled message back in front
    fn release(&mut self) {
        self.lock = None;
        if let Some(stored) = self.in_flight.take() {
            self.pending.push_front(stored);
        }
    }
}

#[derive(Default)]
struct QueueState {
    sessions: HashMap<String, SessionState>,
    dead_letters: Vec<ReceivedMessage>,
}

struct Shared {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
    next_sequence: AtomicU64,
    next_token: AtomicU64,
    settings: BrokerSettings,
}

// ============================================================================
// Broker
// ============================================================================

/// Session broker living inside the process
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Creates a broker hosting the given queues with default settings
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_settings(queues, BrokerSettings::default())
    }

    pub fn with_settings<I, S>(queues: I, settings: BrokerSettings) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queues = queues
            .into_iter()
            .map(|name| (name.into(), QueueState::default()))
            .collect();

        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(queues),
                notify: Notify::new(),
                next_sequence: AtomicU64::new(1),
                next_token: AtomicU64::new(1),
                settings,
            }),
        }
    }

    /// Messages not yet completed on `queue`, oldest first
    pub async fn pending_messages(&self, queue: &str) -> Result<Vec<ReceivedMessage>, BusError> {
        let queues = self.shared.queues.lock().await;
        let state = queues
            .get(queue)
            .ok_or_else(|| BusError::QueueNotFound(queue.to_string()))?;

        let mut messages: Vec<ReceivedMessage> = state
            .sessions
            .values()
            .flat_map(|session| session.in_flight.iter().chain(session.pending.iter()))
            .map(StoredMessage::to_received)
            .collect();
        messages.sort_by_key(|message| message.sequence_number);
        Ok(messages)
    }

    /// Messages moved aside after exhausting their deliveries
    pub async fn dead_letters(&self, queue: &str) -> Result<Vec<ReceivedMessage>, BusError> {
        let queues = self.shared.queues.lock().await;
        queues
            .get(queue)
            .map(|state| state.dead_letters.clone())
            .ok_or_else(|| BusError::QueueNotFound(queue.to_string()))
    }
}

#[async_trait]
impl SessionBroker for InMemoryBroker {
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<(), BusError> {
        {
            let mut queues = self.shared.queues.lock().await;
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| BusError::QueueNotFound(queue.to_string()))?;

            let sequence_number = self.shared.next_sequence.fetch_add(1, Ordering::SeqCst);
            debug!(
                "Enqueued message {} on '{}' (session {})",
                sequence_number, queue, message.session_id
            );
            state
                .sessions
                .entry(message.session_id.clone())
                .or_default()
                .pending
                .push_back(StoredMessage {
                    message,
                    sequence_number,
                    delivery_count: 0,
                    available_at: Instant::now(),
                });
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn accept_next_session(
        &self,
        queue: &str,
        max_wait: Duration,
    ) -> Result<Arc<dyn SessionReceiver>, BusError> {
        let deadline = Instant::now() + max_wait;

        loop {
            let notified = self.shared.notify.notified();
            let wake_at;

            {
                let mut queues = self.shared.queues.lock().await;
                let state = queues
                    .get_mut(queue)
                    .ok_or_else(|| BusError::QueueNotFound(queue.to_string()))?;
                let now = Instant::now();

                let sessions = &state.sessions;
                let unlocked = move || {
                    sessions
                        .iter()
                        .filter(move |(_, session)| !session.is_locked(now))
                        .filter_map(|(id, session)| session.next_message().map(|next| (id, next)))
                };
                let candidate = unlocked()
                    .filter(|(_, next)| next.available_at <= now)
                    .map(|(id, next)| (next.sequence_number, id))
                    .min()
                    .map(|(_, id)| id.clone());
                wake_at = unlocked()
                    .map(|(_, next)| next.available_at)
                    .filter(|at| *at > now)
                    .fold(deadline, Instant::min);

                if let Some(session_id) = candidate
                    && let Some(session) = state.sessions.get_mut(&session_id)
                {
                    if session.lock.is_some() {
                        warn!("Lock on session {} expired, handing it over", session_id);
                    }
                    session.release();

                    let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
                    session.lock = Some(SessionLock {
                        token,
                        locked_until: now + self.shared.settings.lock_duration,
                    });

                    return Ok(Arc::new(InMemoryReceiver {
                        shared: Arc::clone(&self.shared),
                        queue: queue.to_string(),
                        session_id,
                        token,
                    }));
                }
            }

            if timeout_at(wake_at, notified).await.is_err() && Instant::now() >= deadline {
                return Err(BusError::NoSessionAvailable(queue.to_string()));
            }
        }
    }
}

// ============================================================================
// Receiver
// ============================================================================

struct InMemoryReceiver {
    shared: Arc<Shared>,
    queue: String,
    session_id: String,
    token: u64,
}

impl InMemoryReceiver {
    fn locked_session<'a>(
        &self,
        sessions: &'a mut HashMap<String, SessionState>,
    ) -> Result<&'a mut SessionState, BusError> {
        let now = Instant::now();
        sessions
            .get_mut(&self.session_id)
            .filter(|session| {
                session
                    .lock
                    .as_ref()
                    .is_some_and(|lock| lock.token == self.token && lock.locked_until > now)
            })
            .ok_or_else(|| BusError::SessionLockLost(self.session_id.clone()))
    }

    fn queue_mut<'a>(
        &self,
        queues: &'a mut HashMap<String, QueueState>,
    ) -> Result<&'a mut QueueState, BusError> {
        queues
            .get_mut(&self.queue)
            .ok_or_else(|| BusError::QueueNotFound(self.queue.clone()))
    }

    fn take_in_flight(session: &mut SessionState, message: &ReceivedMessage) -> Result<StoredMessage, BusError> {
        match session.in_flight.take() {
            Some(stored) if stored.sequence_number == message.sequence_number => Ok(stored),
            other => {
                session.in_flight = other;
                Err(BusError::MessageNotLocked(message.sequence_number))
            }
        }
    }
}

#[async_trait]
impl SessionReceiver for InMemoryReceiver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>, BusError> {
        let deadline = Instant::now() + max_wait;

        loop {
            let notified = self.shared.notify.notified();
            let mut wake_at = deadline;

            {
                let mut queues = self.shared.queues.lock().await;
                let state = self.queue_mut(&mut queues)?;
                let session = self.locked_session(&mut state.sessions)?;
                let now = Instant::now();

                let available_at = session.pending.front().map(|front| front.available_at);
                if session.in_flight.is_none()
                    && let Some(available_at) = available_at
                {
                    if available_at <= now
                        && let Some(mut stored) = session.pending.pop_front()
                    {
                        stored.delivery_count += 1;
                        let received = stored.to_received();
                        session.in_flight = Some(stored);
                        return Ok(Some(received));
                    }
                    wake_at = wake_at.min(available_at);
                }
            }

            if timeout_at(wake_at, notified).await.is_err() && Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, message: &ReceivedMessage) -> Result<(), BusError> {
        {
            let mut queues = self.shared.queues.lock().await;
            let state = self.queue_mut(&mut queues)?;
            let session = self.locked_session(&mut state.sessions)?;
            Self::take_in_flight(session, message)?;
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), BusError> {
        {
            let mut queues = self.shared.queues.lock().await;
            let QueueState {
                sessions,
                dead_letters,
            } = self.queue_mut(&mut queues)?;
            let session = self.locked_session(sessions)?;
            let mut stored = Self::take_in_flight(session, message)?;

            if stored.delivery_count >= self.shared.settings.max_delivery_count {
                warn!(
                    "Message {} on '{}' exceeded {} deliveries, dead-lettering",
                    stored.sequence_number, self.queue, self.shared.settings.max_delivery_count
                );
                dead_letters.push(stored.to_received());
            } else {
                let backoff = self.shared.settings.backoff(stored.delivery_count);
                debug!(
                    "Message {} abandoned, redelivering in {:?}",
                    stored.sequence_number, backoff
                );
                stored.available_at = Instant::now() + backoff;
                session.pending.push_front(stored);
            }
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn renew_lock(&self) -> Result<(), BusError> {
        let mut queues = self.shared.queues.lock().await;
        let state = self.queue_mut(&mut queues)?;
        let session = self.locked_session(&mut state.sessions)?;

        if let Some(lock) = session.lock.as_mut() {
            lock.locked_until = Instant::now() + self.shared.settings.lock_duration;
        }
        Ok(())
    }

    async fn close(&self) {
        {
            let mut queues = self.shared.queues.lock().await;
            let Some(state) = queues.get_mut(&self.queue) else {
                return;
            };

            let owned = state.sessions.get_mut(&self.session_id).filter(|session| {
                session
                    .lock
                    .as_ref()
                    .is_some_and(|lock| lock.token == self.token)
            });
            if let Some(session) = owned {
                session.release();
                if session.pending.is_empty() {
                    state.sessions.remove(&self.session_id);
                }
            }
        }

        self.shared.notify.notify_waiters();
    }
}
