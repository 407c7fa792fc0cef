//! Actor error types

use crate::registry::ActorKey;
use ipc_network::{ProcessId, ProtocolId, TransportError};
use thiserror::Error;

/// Errors from registry, runtime and supervisor operations
#[derive(Error, Debug)]
pub enum ActorError {
    #[error("Unknown actor {0}")]
    UnknownActor(ActorKey),

    /// The actor is already recorded as opened by some actor
    #[error("Actor {0} opened more than once")]
    AlreadyOpened(ActorKey),

    #[error("Protocol {protocol} does not implement cloning")]
    CloneNotImplemented { protocol: ProtocolId },

    #[error("No descriptor mapped for protocol {protocol}")]
    MissingDescriptor { protocol: ProtocolId },

    #[error("Protocol {0} is not registered")]
    UnknownProtocol(ProtocolId),

    #[error("{0} is not a valid target process")]
    InvalidProcess(ProcessId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for actor operations
pub type Result<T> = std::result::Result<T, ActorError>;

/// A peer broke protocol; always escalated to the failure reporter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProtocolViolation {
    message: String,
}

impl ProtocolViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<TransportError> for ProtocolViolation {
    fn from(error: TransportError) -> Self {
        Self::new(error.to_string())
    }
}
