//! Protocol capabilities
//!
//! A process knows the protocols it can host through its `ProtocolTable`:
//! each `ProtocolId` maps to a factory that instantiates the top-level
//! handler for one side of that protocol. Handlers are what a code
//! generator would otherwise emit as dispatch tables.

use crate::error::ProtocolViolation;
use crate::registry::ActorKey;
use crate::toplevel::ActorHook;
use ipc_network::{Channel, ChannelSender, Message, ProcessId, ProtocolId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which end of a protocol an actor implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Authoritative side; kills a misbehaving peer
    Parent,
    /// Subordinate side; aborts itself on a protocol violation
    Child,
}

impl Side {
    pub fn is_parent(self) -> bool {
        self == Side::Parent
    }
}

/// Why a top-level actor is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownReason {
    /// The owner asked for it
    Requested,
    /// The actor's channel failed or the peer went away
    ChannelError,
    /// The actor that opened this one was destroyed
    OpenerDestroyed,
    /// The peer violated the protocol
    FatalError,
}

/// Inputs available to a protocol while cloning itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneContext {
    /// Process the clone will talk to
    pub peer_pid: ProcessId,
}

/// Returned by protocols that cannot be cloned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneUnsupported;

/// What a handler can see and do while handling an event
pub struct ActorContext<'a> {
    key: ActorKey,
    protocol: ProtocolId,
    peer_pid: ProcessId,
    channel: Option<&'a Channel<ActorHook>>,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(
        key: ActorKey,
        protocol: ProtocolId,
        peer_pid: ProcessId,
        channel: Option<&'a Channel<ActorHook>>,
    ) -> Self {
        Self {
            key,
            protocol,
            peer_pid,
            channel,
        }
    }

    pub fn key(&self) -> ActorKey {
        self.key
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    pub fn peer_pid(&self) -> ProcessId {
        self.peer_pid
    }

    /// Send on this actor's own channel
    pub fn send(&self, message: Message) -> bool {
        self.channel.is_some_and(|channel| channel.send(message))
    }

    /// Handle for sending later, outside the callback
    pub fn sender(&self) -> Option<ChannelSender> {
        self.channel.and_then(Channel::sender)
    }
}

/// Per-protocol behaviour of a top-level actor
pub trait ToplevelProtocol: Send {
    fn on_channel_connected(&mut self, _cx: &mut ActorContext<'_>, _peer_pid: ProcessId) {}

    /// Handle one application message. An `Err` is fatal for the peer
    /// relationship.
    fn on_message_received(
        &mut self,
        cx: &mut ActorContext<'_>,
        message: Message,
    ) -> Result<(), ProtocolViolation>;

    fn on_channel_error(&mut self) {}

    /// Called exactly once, right before the actor is removed
    fn on_teardown(&mut self, _reason: TeardownReason) {}

    /// Produce an equivalent actor for a new peer process
    fn clone_toplevel(
        &self,
        _cx: &CloneContext,
    ) -> Result<Box<dyn ToplevelProtocol>, CloneUnsupported> {
        Err(CloneUnsupported)
    }
}

/// Instantiates one side of a protocol
pub trait ProtocolFactory: Send + Sync {
    fn name(&self) -> &str;

    fn side(&self) -> Side;

    fn create(&self, peer_pid: ProcessId) -> Box<dyn ToplevelProtocol>;

    /// Lift the owning-thread requirement for actors of this protocol
    fn allow_non_main_thread_use(&self) -> bool {
        false
    }
}

/// Protocols this process can host
#[derive(Clone, Default)]
pub struct ProtocolTable {
    factories: HashMap<ProtocolId, Arc<dyn ProtocolFactory>>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any earlier one for `id`
    pub fn register(&mut self, id: ProtocolId, factory: Arc<dyn ProtocolFactory>) -> &mut Self {
        self.factories.insert(id, factory);
        self
    }

    pub fn get(&self, id: ProtocolId) -> Option<&Arc<dyn ProtocolFactory>> {
        self.factories.get(&id)
    }

    pub fn contains(&self, id: ProtocolId) -> bool {
        self.factories.contains_key(&id)
    }

    pub fn name_of(&self, id: ProtocolId) -> &str {
        self.factories
            .get(&id)
            .map(|factory| factory.name())
            .unwrap_or("unknown")
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ProtocolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self
            .factories
            .iter()
            .map(|(id, factory)| (id.as_raw(), factory.name().to_string()))
            .collect();
        names.sort();
        f.debug_struct("ProtocolTable").field("protocols", &names).finish()
    }
}
