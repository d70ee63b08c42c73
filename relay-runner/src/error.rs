use relay_bus::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{description} failed: {message}")]
    CommandFailed { description: String, message: String },

    #[error("failed to read deployment outputs: {0}")]
    OutputsUnavailable(String),

    #[error("credential has been closed")]
    CredentialClosed,

    #[error("invalid credential configuration: {0}")]
    Credential(String),

    #[error("failed to encode status update: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}
