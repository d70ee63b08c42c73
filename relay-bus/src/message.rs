//! Queue message envelopes

use serde::Serialize;

/// A message to enqueue
///
/// `session_id` is the id of the resource the message is about, which
/// serializes all work on one resource through one session.
/// `correlation_id` is the owning operation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub session_id: String,
    pub correlation_id: String,
}

impl OutgoingMessage {
    pub fn new(body: Vec<u8>, session_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            body,
            session_id: session_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Serializes `payload` as the JSON body
    pub fn json<T: Serialize>(
        payload: &T,
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(payload)?, session_id, correlation_id))
    }
}

/// A message delivered under a peek-lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: Vec<u8>,
    pub session_id: String,
    pub correlation_id: String,
    pub sequence_number: u64,
    /// Number of times this message has been handed out, including this one
    pub delivery_count: u32,
}

impl ReceivedMessage {
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
