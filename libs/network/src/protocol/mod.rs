//! Control-Plane Protocol
//!
//! Wire envelope, the parameter read/write primitives and the one control
//! message this layer owns: `ChannelOpened`.

pub mod channel_opened;
pub mod envelope;
pub mod params;

// Re-export commonly used types
pub use channel_opened::{unpack_channel_opened, ChannelOpened};
pub use envelope::{
    encode_frame, EncodedFrame, FrameDecoder, FrameHeader, FrameLimits, HEADER_SIZE,
};
pub use params::{ParamReader, ParamWriter, ReadParam, WriteParam};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sent first on every link; carries the sender's process id
pub const HELLO_MESSAGE_TYPE: u32 = u16::MAX as u32;

/// Asks the receiving top-level actor to open a relayed transport
pub const CHANNEL_OPENED_MESSAGE_TYPE: u32 = u16::MAX as u32 - 4;

/// Tag identifying an actor protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolId(u32);

impl ProtocolId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol-{}", self.0)
    }
}
