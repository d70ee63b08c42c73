use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no session available on queue '{0}'")]
    NoSessionAvailable(String),

    #[error("lock on session '{0}' was lost")]
    SessionLockLost(String),

    #[error("message {0} is not locked by this receiver")]
    MessageNotLocked(u64),

    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),

    #[error("broker connection error: {0}")]
    Connection(String),
}

impl BusError {
    /// Errors the receive loop recovers from by simply trying again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusError::NoSessionAvailable(_) | BusError::SessionLockLost(_) | BusError::Connection(_)
        )
    }
}
