//! Transport Error Types
//!
//! Error handling for channel transports, descriptor passing and the wire
//! envelope.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection management errors (peer gone, refused, not yet open)
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed frames or control messages
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Operation attempted on a channel that is closed or errored
    #[error("Channel closed: {operation}")]
    Closed { operation: String },

    /// Descriptor creation, duplication or adoption failures
    #[error("Descriptor error: {message}")]
    Descriptor {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Queue capacity exhausted
    #[error("Resource exhausted: {resource}: {message}")]
    ResourceExhausted { resource: String, message: String },

    /// Owning-thread discipline violated
    #[error("{operation} called off the channel's owning thread")]
    WrongThread { operation: String },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a closed-channel error
    pub fn closed(operation: impl Into<String>) -> Self {
        Self::Closed {
            operation: operation.into(),
        }
    }

    /// Create a descriptor error
    pub fn descriptor(message: impl Into<String>) -> Self {
        Self::Descriptor {
            message: message.into(),
            source: None,
        }
    }

    /// Create a descriptor error with source
    pub fn descriptor_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Descriptor {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a resource exhausted error
    pub fn resource_exhausted(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a wrong-thread error
    pub fn wrong_thread(operation: impl Into<String>) -> Self {
        Self::WrongThread {
            operation: operation.into(),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection { .. } => true,
            TransportError::ResourceExhausted { .. } => true,
            TransportError::Io { .. } => true,
            TransportError::Protocol { .. } => false,
            TransportError::Configuration { .. } => false,
            TransportError::Closed { .. } => false,
            TransportError::Descriptor { .. } => false,
            TransportError::WrongThread { .. } => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Connection { .. } => "connection",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Closed { .. } => "closed",
            TransportError::Descriptor { .. } => "descriptor",
            TransportError::ResourceExhausted { .. } => "resource_exhausted",
            TransportError::WrongThread { .. } => "wrong_thread",
            TransportError::Io { .. } => "io",
        }
    }
}

/// Convert standard I/O errors to transport errors
impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

/// Convert raw errno values from descriptor syscalls
impl From<nix::errno::Errno> for TransportError {
    fn from(errno: nix::errno::Errno) -> Self {
        TransportError::from(std::io::Error::from(errno))
    }
}
