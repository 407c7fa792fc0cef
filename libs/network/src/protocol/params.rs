//! Parameter Read/Write Primitives
//!
//! Sequential little-endian field codec for control-plane payloads.
//! Descriptors are not written inline: the writer attaches them to the
//! message and records their index, the reader takes them back out by index.

use crate::message::{Message, Priority, RoutingId};
use crate::process::ProcessId;
use crate::protocol::ProtocolId;
use crate::transports::TransportDescriptor;
use crate::{Result, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::os::fd::OwnedFd;

/// Builds a message payload field by field
#[derive(Debug, Default)]
pub struct ParamWriter {
    buf: BytesMut,
    descriptors: Vec<OwnedFd>,
}

impl ParamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Attach a descriptor and write its index
    pub fn write_descriptor(&mut self, fd: OwnedFd) {
        let index = self.descriptors.len() as u32;
        self.descriptors.push(fd);
        self.write_u32(index);
    }

    pub fn write<P: WriteParam>(&mut self, param: P) {
        param.write_param(self);
    }

    /// Produce the finished message
    pub fn finish(self, routing: RoutingId, msg_type: u32, priority: Priority) -> Message {
        Message::from_parts(
            routing,
            msg_type,
            priority,
            self.buf.freeze(),
            self.descriptors,
        )
    }
}

/// Reads fields back out of a received message
#[derive(Debug)]
pub struct ParamReader {
    payload: Bytes,
    descriptors: Vec<Option<OwnedFd>>,
}

impl ParamReader {
    pub fn new(message: Message) -> Self {
        let (_, _, _, payload, descriptors) = message.into_parts();
        Self {
            payload,
            descriptors: descriptors.into_iter().map(Some).collect(),
        }
    }

    fn need(&self, bytes: usize, field: &str) -> Result<()> {
        if self.payload.remaining() < bytes {
            return Err(TransportError::protocol(format!(
                "Payload too short reading {}",
                field
            )));
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.payload.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.payload.get_i32_le())
    }

    /// Read a descriptor index and take the descriptor it names
    pub fn read_descriptor(&mut self) -> Result<OwnedFd> {
        let index = self.read_u32()? as usize;
        self.descriptors
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| {
                TransportError::protocol(format!(
                    "Descriptor index {} missing or already taken",
                    index
                ))
            })
    }

    pub fn read<P: ReadParam>(&mut self) -> Result<P> {
        P::read_param(self)
    }

    /// Finish reading; leftover bytes or descriptors are a protocol error
    pub fn end_read(self) -> Result<()> {
        if self.payload.has_remaining() {
            return Err(TransportError::protocol(format!(
                "{} trailing bytes after last field",
                self.payload.remaining()
            )));
        }
        let unread = self.descriptors.iter().filter(|fd| fd.is_some()).count();
        if unread > 0 {
            return Err(TransportError::protocol(format!(
                "{} attached descriptors were never read",
                unread
            )));
        }
        Ok(())
    }
}

/// Types that can be written as a message field
pub trait WriteParam {
    fn write_param(self, writer: &mut ParamWriter);
}

/// Types that can be read from a message field
pub trait ReadParam: Sized {
    fn read_param(reader: &mut ParamReader) -> Result<Self>;
}

impl WriteParam for u32 {
    fn write_param(self, writer: &mut ParamWriter) {
        writer.write_u32(self);
    }
}

impl ReadParam for u32 {
    fn read_param(reader: &mut ParamReader) -> Result<Self> {
        reader.read_u32()
    }
}

impl WriteParam for ProcessId {
    fn write_param(self, writer: &mut ParamWriter) {
        writer.write_u32(self.as_raw());
    }
}

impl ReadParam for ProcessId {
    fn read_param(reader: &mut ParamReader) -> Result<Self> {
        Ok(ProcessId::from_raw(reader.read_u32()?))
    }
}

impl WriteParam for ProtocolId {
    fn write_param(self, writer: &mut ParamWriter) {
        writer.write_u32(self.as_raw());
    }
}

impl ReadParam for ProtocolId {
    fn read_param(reader: &mut ParamReader) -> Result<Self> {
        Ok(ProtocolId::new(reader.read_u32()?))
    }
}

impl WriteParam for TransportDescriptor {
    fn write_param(self, writer: &mut ParamWriter) {
        writer.write_descriptor(self.into_owned_fd());
    }
}

impl ReadParam for TransportDescriptor {
    fn read_param(reader: &mut ParamReader) -> Result<Self> {
        Ok(TransportDescriptor::adopt(reader.read_descriptor()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_fields_read_back_in_order() {
        let mut writer = ParamWriter::new();
        writer.write(ProcessId::from_raw(41));
        writer.write_i32(-7);
        writer.write(ProtocolId::new(3));
        let msg = writer.finish(RoutingId::CONTROL, 1, Priority::Normal);

        let mut reader = ParamReader::new(msg);
        assert_eq!(reader.read::<ProcessId>().unwrap(), ProcessId::from_raw(41));
        assert_eq!(reader.read_i32().unwrap(), -7);
        assert_eq!(reader.read::<ProtocolId>().unwrap(), ProtocolId::new(3));
        assert!(reader.end_read().is_ok());
    }

    #[test]
    fn test_short_payload_is_error() {
        let msg = Message::new(RoutingId::CONTROL, 1, vec![1u8, 2]);
        let mut reader = ParamReader::new(msg);
        assert!(reader.read_u32().is_err());
    }

    #[test]
    fn test_trailing_bytes_fail_end_read() {
        let mut writer = ParamWriter::new();
        writer.write_u32(1);
        writer.write_u32(2);
        let mut reader = ParamReader::new(writer.finish(RoutingId::CONTROL, 1, Priority::Normal));
        reader.read_u32().unwrap();
        assert!(reader.end_read().is_err());
    }

    #[test]
    fn test_descriptor_taken_once() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut writer = ParamWriter::new();
        writer.write_descriptor(OwnedFd::from(a));
        // Second index referring to the same slot
        writer.write_u32(0);
        let msg = writer.finish(RoutingId::CONTROL, 1, Priority::Normal);
        assert_eq!(msg.descriptor_count(), 1);

        let mut reader = ParamReader::new(msg);
        assert!(reader.read_descriptor().is_ok());
        assert!(reader.read_descriptor().is_err());
    }

    #[test]
    fn test_unread_descriptor_fails_end_read() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut msg = Message::control(1, Bytes::new());
        msg.attach_descriptor(OwnedFd::from(a));
        assert!(ParamReader::new(msg).end_read().is_err());
    }
}
