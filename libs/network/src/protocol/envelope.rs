//! Wire Envelope
//!
//! Every message travels as a fixed 16-byte little-endian header followed by
//! its payload:
//!
//! ```text
//! [payload_len:4][routing:4][msg_type:4][priority:1][flags:1][num_fds:2][payload]
//! ```
//!
//! Attached descriptors are not part of the byte stream. The link sends them
//! out-of-band together with the first byte of their frame, so by the time a
//! frame's bytes are complete its descriptors have been received too.

use crate::message::{Message, Priority, RoutingId};
use crate::{Result, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipc_config::ChannelSettings;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;

/// Size of the fixed frame header
pub const HEADER_SIZE: usize = 16;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub routing: RoutingId,
    pub msg_type: u32,
    pub priority: Priority,
    pub flags: u8,
    pub num_fds: u16,
}

impl FrameHeader {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.payload_len);
        buf.put_i32_le(self.routing.as_raw());
        buf.put_u32_le(self.msg_type);
        buf.put_u8(self.priority.to_wire());
        buf.put_u8(self.flags);
        buf.put_u16_le(self.num_fds);
    }

    /// Parse a header from the first `HEADER_SIZE` bytes
    pub fn parse(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TransportError::protocol("Truncated frame header"));
        }
        let payload_len = bytes.get_u32_le();
        let routing = RoutingId::new(bytes.get_i32_le());
        let msg_type = bytes.get_u32_le();
        let raw_priority = bytes.get_u8();
        let flags = bytes.get_u8();
        let num_fds = bytes.get_u16_le();

        let priority = Priority::from_wire(raw_priority).ok_or_else(|| {
            TransportError::protocol(format!("Unknown priority value {}", raw_priority))
        })?;

        Ok(Self {
            payload_len,
            routing,
            msg_type,
            priority,
            flags,
            num_fds,
        })
    }
}

/// A message flattened for the wire
#[derive(Debug)]
pub struct EncodedFrame {
    pub bytes: Bytes,
    pub descriptors: Vec<OwnedFd>,
}

/// Size and descriptor limits a frame must respect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_message_size: usize,
    pub max_descriptors: usize,
}

impl FrameLimits {
    pub fn check(&self, message: &Message) -> Result<()> {
        let size = message.payload().len();
        if size > self.max_message_size {
            return Err(TransportError::protocol(format!(
                "Message size {} exceeds maximum {}",
                size, self.max_message_size
            )));
        }
        let descriptors = message.descriptor_count();
        if descriptors > self.max_descriptors {
            return Err(TransportError::protocol(format!(
                "Message carries {} descriptors, maximum is {}",
                descriptors, self.max_descriptors
            )));
        }
        Ok(())
    }
}

impl From<&ChannelSettings> for FrameLimits {
    fn from(settings: &ChannelSettings) -> Self {
        Self {
            max_message_size: settings.max_message_size,
            max_descriptors: settings.max_descriptors_per_message,
        }
    }
}

/// Flatten a message, enforcing the channel's size and descriptor limits
pub fn encode_frame(message: Message, settings: &ChannelSettings) -> Result<EncodedFrame> {
    FrameLimits::from(settings).check(&message)?;
    let (routing, msg_type, priority, payload, descriptors) = message.into_parts();

    let header = FrameHeader {
        payload_len: payload.len() as u32,
        routing,
        msg_type,
        priority,
        flags: 0,
        num_fds: descriptors.len() as u16,
    };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    header.write(&mut buf);
    buf.extend_from_slice(&payload);

    Ok(EncodedFrame {
        bytes: buf.freeze(),
        descriptors,
    })
}

/// Incremental frame decoder fed by socket reads
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    pending_descriptors: VecDeque<OwnedFd>,
    max_message_size: usize,
    max_descriptors: usize,
}

impl FrameDecoder {
    pub fn new(settings: &ChannelSettings) -> Self {
        Self {
            buffer: BytesMut::with_capacity(settings.read_buffer_size),
            pending_descriptors: VecDeque::new(),
            max_message_size: settings.max_message_size,
            max_descriptors: settings.max_descriptors_per_message,
        }
    }

    /// Append bytes read from the socket
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Queue descriptors received alongside the bytes
    pub fn push_descriptors(&mut self, descriptors: impl IntoIterator<Item = OwnedFd>) {
        self.pending_descriptors.extend(descriptors);
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete message, if one is buffered
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::parse(&self.buffer[..HEADER_SIZE])?;
        let payload_len = header.payload_len as usize;
        let num_fds = header.num_fds as usize;

        if payload_len > self.max_message_size {
            return Err(TransportError::protocol(format!(
                "Message size {} exceeds maximum {}",
                payload_len, self.max_message_size
            )));
        }
        if num_fds > self.max_descriptors {
            return Err(TransportError::protocol(format!(
                "Frame declares {} descriptors, maximum is {}",
                num_fds, self.max_descriptors
            )));
        }
        if self.buffer.len() < HEADER_SIZE + payload_len {
            return Ok(None);
        }
        if self.pending_descriptors.len() < num_fds {
            return Err(TransportError::protocol(format!(
                "Frame declares {} descriptors but only {} arrived",
                num_fds,
                self.pending_descriptors.len()
            )));
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(payload_len).freeze();
        let descriptors: Vec<OwnedFd> = self.pending_descriptors.drain(..num_fds).collect();

        Ok(Some(Message::from_parts(
            header.routing,
            header.msg_type,
            header.priority,
            payload,
            descriptors,
        )))
    }
}
