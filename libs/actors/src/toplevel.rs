//! Top-level actors
//!
//! A `TopLevelActor` is the root of one actor subtree and owns the channel
//! it talks over. Its fields are private to this crate; the registry and
//! runtime mutate them through narrow methods.

use crate::error::ProtocolViolation;
use crate::protocol::{ActorContext, Side, TeardownReason, ToplevelProtocol};
use crate::registry::ActorKey;
use ipc_network::{Channel, Listener, Message, ProcessId, ProtocolId, TransportDescriptor};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

/// Channel activity tagged with the actor it belongs to
#[derive(Debug)]
pub(crate) struct ActorEvent {
    pub key: ActorKey,
    pub kind: ActorEventKind,
}

#[derive(Debug)]
pub(crate) enum ActorEventKind {
    Connected(ProcessId),
    Message(Message),
    Error,
}

/// Listener bound to every actor channel; forwards to the runtime's queue
pub struct ActorHook {
    key: ActorKey,
    events: mpsc::UnboundedSender<ActorEvent>,
}

impl ActorHook {
    pub(crate) fn new(key: ActorKey, events: mpsc::UnboundedSender<ActorEvent>) -> Self {
        Self { key, events }
    }

    fn forward(&self, kind: ActorEventKind) {
        if self.events.send(ActorEvent { key: self.key, kind }).is_err() {
            debug!(actor = %self.key, "Runtime gone; dropping actor event");
        }
    }
}

impl Listener for ActorHook {
    fn on_message_received(&mut self, message: Message) {
        self.forward(ActorEventKind::Message(message));
    }

    fn on_channel_connected(&mut self, peer_pid: ProcessId) {
        self.forward(ActorEventKind::Connected(peer_pid));
    }

    fn on_channel_error(&mut self) {
        self.forward(ActorEventKind::Error);
    }
}

/// Root of one actor subtree, bound 1:1 to a channel
pub struct TopLevelActor {
    protocol: ProtocolId,
    peer_pid: ProcessId,
    side: Side,
    allow_non_main_thread_use: bool,
    handler: Box<dyn ToplevelProtocol>,
    channel: Option<Channel<ActorHook>>,
    /// Descriptor waiting to become this actor's channel
    pending: Option<TransportDescriptor>,
    torn_down: bool,
}

impl TopLevelActor {
    pub fn new(
        protocol: ProtocolId,
        peer_pid: ProcessId,
        side: Side,
        handler: Box<dyn ToplevelProtocol>,
    ) -> Self {
        Self {
            protocol,
            peer_pid,
            side,
            allow_non_main_thread_use: false,
            handler,
            channel: None,
            pending: None,
            torn_down: false,
        }
    }

    pub fn with_non_main_thread_use(mut self, allow: bool) -> Self {
        self.allow_non_main_thread_use = allow;
        self
    }

    pub(crate) fn with_pending_descriptor(mut self, descriptor: TransportDescriptor) -> Self {
        self.pending = Some(descriptor);
        self
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    pub fn peer_pid(&self) -> ProcessId {
        self.peer_pid
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn allows_non_main_thread_use(&self) -> bool {
        self.allow_non_main_thread_use
    }

    pub fn channel(&self) -> Option<&Channel<ActorHook>> {
        self.channel.as_ref()
    }

    pub(crate) fn channel_mut(&mut self) -> Option<&mut Channel<ActorHook>> {
        self.channel.as_mut()
    }

    pub(crate) fn attach_channel(&mut self, channel: Channel<ActorHook>) {
        self.channel = Some(channel);
    }

    pub(crate) fn take_pending_descriptor(&mut self) -> Option<TransportDescriptor> {
        self.pending.take()
    }

    pub(crate) fn handler(&self) -> &dyn ToplevelProtocol {
        self.handler.as_ref()
    }

    pub(crate) fn connected(&mut self, key: ActorKey, peer_pid: ProcessId) {
        let mut cx = ActorContext::new(key, self.protocol, self.peer_pid, self.channel.as_ref());
        self.handler.on_channel_connected(&mut cx, peer_pid);
    }

    pub(crate) fn deliver(
        &mut self,
        key: ActorKey,
        message: Message,
    ) -> Result<(), ProtocolViolation> {
        let mut cx = ActorContext::new(key, self.protocol, self.peer_pid, self.channel.as_ref());
        self.handler.on_message_received(&mut cx, message)
    }

    pub(crate) fn channel_error(&mut self) {
        self.handler.on_channel_error();
    }

    /// Notify the handler and release the channel. Runs at most once.
    pub(crate) fn teardown(&mut self, reason: TeardownReason) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.handler.on_teardown(reason);
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        if let Some(descriptor) = self.pending.take() {
            descriptor.close();
        }
    }
}

impl fmt::Debug for TopLevelActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopLevelActor")
            .field("protocol", &self.protocol)
            .field("peer_pid", &self.peer_pid)
            .field("side", &self.side)
            .field("channel", &self.channel.as_ref().map(Channel::state))
            .finish()
    }
}

/// Descriptors handed to a clone-the-forest operation, keyed by protocol
#[derive(Debug, Default)]
pub struct FdMappings {
    mappings: Vec<(ProtocolId, TransportDescriptor)>,
}

impl FdMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, protocol: ProtocolId, descriptor: TransportDescriptor) {
        self.mappings.push((protocol, descriptor));
    }

    /// Take the first descriptor mapped to `protocol`
    pub fn take(&mut self, protocol: ProtocolId) -> Option<TransportDescriptor> {
        let index = self.mappings.iter().position(|(id, _)| *id == protocol)?;
        Some(self.mappings.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
