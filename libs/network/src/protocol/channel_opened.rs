//! ChannelOpened control message
//!
//! Tells a top-level actor to open one end of a freshly created transport
//! and instantiate `protocol` on it, talking to `peer_pid`. The message is
//! always routed to `RoutingId::CONTROL` and is decodable without knowing
//! anything about the protocol it bootstraps.

use super::params::{ParamReader, ParamWriter};
use super::{ProtocolId, CHANNEL_OPENED_MESSAGE_TYPE};
use crate::message::{Message, Priority, RoutingId};
use crate::process::ProcessId;
use crate::transports::TransportDescriptor;
use crate::{Result, TransportError};

/// Decoded `ChannelOpened` fields
#[derive(Debug)]
pub struct ChannelOpened {
    pub descriptor: TransportDescriptor,
    pub peer_pid: ProcessId,
    pub protocol: ProtocolId,
    pub priority: Priority,
}

impl ChannelOpened {
    pub fn new(
        descriptor: TransportDescriptor,
        peer_pid: ProcessId,
        protocol: ProtocolId,
        priority: Priority,
    ) -> Self {
        Self {
            descriptor,
            peer_pid,
            protocol,
            priority,
        }
    }

    /// Serialize into a control message; the descriptor moves into it
    pub fn into_message(self) -> Message {
        let mut writer = ParamWriter::new();
        writer.write(self.descriptor);
        writer.write(self.peer_pid);
        writer.write(self.protocol);
        writer.finish(RoutingId::CONTROL, CHANNEL_OPENED_MESSAGE_TYPE, self.priority)
    }
}

/// Decode a `ChannelOpened` message
///
/// Fails on the wrong routing or message type, on missing fields, on a
/// missing descriptor and on trailing data.
pub fn unpack_channel_opened(message: Message) -> Result<ChannelOpened> {
    if !message.is_control() || message.msg_type() != CHANNEL_OPENED_MESSAGE_TYPE {
        return Err(TransportError::protocol(format!(
            "Not a ChannelOpened message: {} type {}",
            message.routing(),
            message.msg_type()
        )));
    }

    let priority = message.priority();
    let mut reader = ParamReader::new(message);
    let descriptor = reader.read::<TransportDescriptor>()?;
    let peer_pid = reader.read::<ProcessId>()?;
    let protocol = reader.read::<ProtocolId>()?;
    reader.end_read()?;

    Ok(ChannelOpened {
        descriptor,
        peer_pid,
        protocol,
        priority,
    })
}
