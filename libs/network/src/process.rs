//! Process identifiers
//!
//! `ProcessId` is an opaque OS process id. It never implies liveness.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque OS process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Sentinel for "no process". Never a legal bridge/open target.
    ///
    /// Zero is reserved because `kill(0, ..)` addresses the whole process
    /// group.
    pub const INVALID: ProcessId = ProcessId(0);

    /// Sentinel meaning "the calling process", independent of its real pid
    pub const CURRENT: ProcessId = ProcessId(u32::MAX);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Real pid of the calling process
    pub fn current() -> Self {
        Self(std::process::id())
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// True for either sentinel
    pub fn is_sentinel(self) -> bool {
        self == Self::INVALID || self == Self::CURRENT
    }

    /// True for `CURRENT` and for the calling process's real pid
    pub fn is_current_process(self) -> bool {
        self == Self::CURRENT || self.0 == std::process::id()
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => write!(f, "pid:invalid"),
            Self::CURRENT => write!(f, "pid:current"),
            ProcessId(raw) => write!(f, "pid:{}", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(!ProcessId::INVALID.is_valid());
        assert!(ProcessId::CURRENT.is_valid());
        assert!(ProcessId::CURRENT.is_sentinel());
        assert!(!ProcessId::from_raw(42).is_sentinel());
        assert_eq!(ProcessId::default(), ProcessId::INVALID);
    }

    #[test]
    fn test_current_is_real_pid() {
        let current = ProcessId::current();
        assert_eq!(current.as_raw(), std::process::id());
        assert!(!current.is_sentinel());
        assert!(current.is_current_process());
        assert!(ProcessId::CURRENT.is_current_process());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProcessId::from_raw(7).to_string(), "pid:7");
        assert_eq!(ProcessId::INVALID.to_string(), "pid:invalid");
    }
}
