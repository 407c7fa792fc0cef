//! Transport Layer
//!
//! Creates the OS transports channels run over and moves frames across
//! them. `TransportFactory` is the seam used by Bridge/Open to fabricate
//! descriptor pairs; `unix` carries framed messages and descriptors over a
//! connected Unix stream socket.

use crate::process::ProcessId;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use tracing::debug;

pub mod descriptor;
pub mod metrics;
pub mod unix;

// Re-export transport types
pub use descriptor::{DescriptorLedger, TransportDescriptor};
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use unix::{
    bind_named, connect_named, spawn_link, EventSink, LinkEvent, LinkHandle, LinkSource,
    NamedListener, OutboundQueues, SendPermit, WeakQueues,
};

/// Which side of a new transport a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportMode {
    /// Parent side; binds named channels
    Server,
    /// Child side; connects to named channels
    Client,
}

/// Creates and discards transport descriptor pairs
pub trait TransportFactory: Send + Sync {
    /// Create a connected `(parent_side, child_side)` pair. `target` is the
    /// process the parent side is destined for.
    fn create_transport(
        &self,
        target: ProcessId,
    ) -> Result<(TransportDescriptor, TransportDescriptor)>;

    /// Discard a descriptor that will never be opened
    fn close_descriptor(&self, descriptor: TransportDescriptor) {
        descriptor.close();
    }
}

/// Factory backed by `socketpair(AF_UNIX, SOCK_STREAM)`
#[derive(Debug, Clone, Default)]
pub struct SocketPairFactory {
    ledger: DescriptorLedger,
}

impl SocketPairFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger counting this factory's outstanding descriptors
    pub fn ledger(&self) -> &DescriptorLedger {
        &self.ledger
    }
}

impl TransportFactory for SocketPairFactory {
    fn create_transport(
        &self,
        target: ProcessId,
    ) -> Result<(TransportDescriptor, TransportDescriptor)> {
        let (parent, child) = UnixStream::pair()?;
        debug!(%target, "Created socket pair transport");
        Ok((
            TransportDescriptor::tracked(OwnedFd::from(parent), &self.ledger),
            TransportDescriptor::tracked(OwnedFd::from(child), &self.ledger),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_close_leaks_nothing() {
        let factory = SocketPairFactory::new();
        let (parent, child) = factory.create_transport(ProcessId::from_raw(77)).unwrap();
        assert_eq!(factory.ledger().live(), 2);

        factory.close_descriptor(parent);
        factory.close_descriptor(child);
        assert_eq!(factory.ledger().live(), 0);
    }

    #[test]
    fn test_clones_share_ledger() {
        let factory = SocketPairFactory::new();
        let clone = factory.clone();
        let (parent, child) = clone.create_transport(ProcessId::from_raw(1)).unwrap();
        assert_eq!(factory.ledger().live(), 2);
        drop(parent);
        drop(child);
        assert_eq!(factory.ledger().live(), 0);
    }
}
