//! Channel Message Interface
//!
//! A `Message` is what moves across a `Channel`: a routing id, a message
//! type, a priority, an opaque payload and any OS descriptors riding along
//! with it. The layer does not interpret payloads except for the control
//! plane (`RoutingId::CONTROL`).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::OwnedFd;

/// Actor routing id carried in every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingId(i32);

impl RoutingId {
    /// Messages addressed to the top-level actor / channel owner itself
    pub const CONTROL: RoutingId = RoutingId(i32::MAX);
    /// Unrouted
    pub const NONE: RoutingId = RoutingId(-2);

    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }

    pub fn is_control(self) -> bool {
        self == Self::CONTROL
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_control() {
            write!(f, "route:control")
        } else {
            write!(f, "route:{}", self.0)
        }
    }
}

/// Delivery priority within one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Default for application traffic
    Normal,
    /// Latency-sensitive traffic, still ordered with normal messages
    High,
    /// Control-plane traffic delivered ahead of queued normal traffic
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub fn to_wire(self) -> u8 {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
            Priority::Urgent => 2,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Priority::Normal),
            1 => Some(Priority::High),
            2 => Some(Priority::Urgent),
            _ => None,
        }
    }

    /// Whether this priority uses the urgent outbound queue
    pub fn is_urgent(self) -> bool {
        self == Priority::Urgent
    }
}

/// A message with optional attached descriptors
#[derive(Debug)]
pub struct Message {
    routing: RoutingId,
    msg_type: u32,
    priority: Priority,
    payload: Bytes,
    descriptors: Vec<OwnedFd>,
}

impl Message {
    /// Create a new normal-priority message
    pub fn new(routing: RoutingId, msg_type: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            routing,
            msg_type,
            priority: Priority::Normal,
            payload: payload.into(),
            descriptors: Vec::new(),
        }
    }

    /// Create a control-plane message
    pub fn control(msg_type: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(RoutingId::CONTROL, msg_type, payload)
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Reassemble a message decoded from the wire
    pub fn from_parts(
        routing: RoutingId,
        msg_type: u32,
        priority: Priority,
        payload: Bytes,
        descriptors: Vec<OwnedFd>,
    ) -> Self {
        Self {
            routing,
            msg_type,
            priority,
            payload,
            descriptors,
        }
    }

    pub fn routing(&self) -> RoutingId {
        self.routing
    }

    pub fn msg_type(&self) -> u32 {
        self.msg_type
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_control(&self) -> bool {
        self.routing.is_control()
    }

    /// Number of attached descriptors
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Attach a descriptor, returning its index within this message
    pub fn attach_descriptor(&mut self, fd: OwnedFd) -> u32 {
        self.descriptors.push(fd);
        (self.descriptors.len() - 1) as u32
    }

    /// Split into header fields, payload and descriptors
    pub fn into_parts(self) -> (RoutingId, u32, Priority, Bytes, Vec<OwnedFd>) {
        (
            self.routing,
            self.msg_type,
            self.priority,
            self.payload,
            self.descriptors,
        )
    }
}
