//! IPC Network Layer
//!
//! Channels between processes: process ids, messages and the wire envelope,
//! transport descriptors and how they are created, the Unix link that
//! carries frames and descriptors, and the `Channel` that owns a link and
//! feeds one listener.

pub mod binding;
pub mod channel;
pub mod error;
pub mod message;
pub mod process;
pub mod protocol;
pub mod transports;

// Re-export commonly used types
pub use binding::ThreadBinding;
pub use channel::{Channel, ChannelId, ChannelOptions, ChannelSender, ChannelState, Listener};
pub use error::{Result, TransportError};
pub use message::{Message, Priority, RoutingId};
pub use process::ProcessId;
pub use protocol::{
    unpack_channel_opened, ChannelOpened, ProtocolId, CHANNEL_OPENED_MESSAGE_TYPE,
    HELLO_MESSAGE_TYPE,
};
pub use transports::{
    DescriptorLedger, SendPermit, SocketPairFactory, TransportDescriptor, TransportFactory,
    TransportMode,
};
