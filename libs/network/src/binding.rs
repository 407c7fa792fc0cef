//! Owning-thread discipline
//!
//! Listener callbacks and actor bookkeeping run on one designated thread.
//! A binding records that thread; relaxed bindings accept any caller and
//! leave synchronization to it.

use crate::{Result, TransportError};
use std::thread::{self, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadBinding {
    owner: ThreadId,
    relaxed: bool,
}

impl ThreadBinding {
    /// Bind to the calling thread
    pub fn current() -> Self {
        Self {
            owner: thread::current().id(),
            relaxed: false,
        }
    }

    /// Accept callers from any thread
    pub fn relaxed() -> Self {
        Self {
            owner: thread::current().id(),
            relaxed: true,
        }
    }

    pub fn is_relaxed(&self) -> bool {
        self.relaxed
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_owning_thread(&self) -> bool {
        self.relaxed || thread::current().id() == self.owner
    }

    /// Fail unless called from the owning thread
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_owning_thread() {
            Ok(())
        } else {
            Err(TransportError::wrong_thread(operation))
        }
    }
}

impl Default for ThreadBinding {
    fn default() -> Self {
        Self::current()
    }
}
