//! Transport descriptors
//!
//! A `TransportDescriptor` is one end of a not-yet-opened transport. It is a
//! move-only value: consuming it (opening a channel on it, or writing it into
//! a message) and closing it both take `self`, so neither can happen twice.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Counts descriptors created by a factory that are still outstanding
///
/// A descriptor stops counting once it is consumed or closed.
#[derive(Debug, Clone, Default)]
pub struct DescriptorLedger {
    live: Arc<AtomicUsize>,
}

impl DescriptorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptors neither consumed nor closed yet
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn acquire(&self) -> LedgerToken {
        self.live.fetch_add(1, Ordering::AcqRel);
        LedgerToken {
            live: Arc::clone(&self.live),
        }
    }
}

#[derive(Debug)]
struct LedgerToken {
    live: Arc<AtomicUsize>,
}

impl Drop for LedgerToken {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One end of a transport, not yet opened as a channel
pub struct TransportDescriptor {
    fd: OwnedFd,
    token: Option<LedgerToken>,
}

impl TransportDescriptor {
    /// Wrap a freshly created descriptor, counting it in `ledger`
    pub fn tracked(fd: OwnedFd, ledger: &DescriptorLedger) -> Self {
        Self {
            fd,
            token: Some(ledger.acquire()),
        }
    }

    /// Adopt a descriptor received from another process
    pub fn adopt(fd: OwnedFd) -> Self {
        Self { fd, token: None }
    }

    /// Consume the descriptor, handing out the OS handle
    pub fn into_owned_fd(self) -> OwnedFd {
        trace!(fd = self.fd.as_raw_fd(), "Transport descriptor consumed");
        self.fd
    }

    /// Close the OS handle without ever opening it
    pub fn close(self) {
        trace!(fd = self.fd.as_raw_fd(), "Transport descriptor closed");
        drop(self.fd);
    }
}

impl AsRawFd for TransportDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl fmt::Debug for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportDescriptor")
            .field("fd", &self.fd.as_raw_fd())
            .field("tracked", &self.token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_ledger_counts_until_consumed_or_closed() {
        let ledger = DescriptorLedger::new();
        let (a, b) = UnixStream::pair().unwrap();
        let a = TransportDescriptor::tracked(OwnedFd::from(a), &ledger);
        let b = TransportDescriptor::tracked(OwnedFd::from(b), &ledger);
        assert_eq!(ledger.live(), 2);

        let _fd = a.into_owned_fd();
        assert_eq!(ledger.live(), 1);

        b.close();
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_adopted_descriptor_is_untracked() {
        let ledger = DescriptorLedger::new();
        let (a, _b) = UnixStream::pair().unwrap();
        let adopted = TransportDescriptor::adopt(OwnedFd::from(a));
        assert!(format!("{:?}", adopted).contains("tracked: false"));
        assert_eq!(ledger.live(), 0);
    }
}
