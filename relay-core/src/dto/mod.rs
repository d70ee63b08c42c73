//! Data Transfer Objects for queue communication
//!
//! This module contains the message schemas exchanged over the two session
//! queues: resource requests (sender/updater to resource processor) and
//! deployment status updates (resource processor to updater). Parsing happens
//! once at the queue boundary and yields a typed `ParseError` on bad payloads.

use thiserror::Error;

pub mod request;
pub mod status_update;

/// A queue payload that does not match its schema
#[derive(Debug, Error)]
#[error("invalid {kind} message: {source}")]
pub struct ParseError {
    pub kind: &'static str,
    #[source]
    pub source: serde_json::Error,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, source: serde_json::Error) -> Self {
        Self { kind, source }
    }
}
