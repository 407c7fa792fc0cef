//! Channel
//!
//! A `Channel` is an ordered, reliable, bidirectional message connection to
//! exactly one peer process, delivering everything it receives to exactly
//! one bound `Listener`.
//!
//! Socket I/O runs on tokio tasks, but the listener is only ever called from
//! `dispatch_pending`/`dispatch_next`, which the owner drives on the
//! channel's owning thread. Once a channel is `Closed` or `Errored` nothing
//! reaches the listener again.

use crate::binding::ThreadBinding;
use crate::message::{Message, Priority};
use crate::process::ProcessId;
use crate::transports::{
    bind_named, connect_named, spawn_link, EventSink, LinkEvent, LinkHandle, LinkMetrics,
    LinkSource, SendPermit, TransportDescriptor, TransportMode, WeakQueues,
};
use crate::{Result, TransportError};
use ipc_config::{ChannelSettings, IpcConfig};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Receives a channel's inbound activity
pub trait Listener: Send {
    fn on_message_received(&mut self, message: Message);
    fn on_channel_connected(&mut self, peer_pid: ProcessId);
    fn on_channel_error(&mut self);

    /// The kernel vouched for the peer's pid. Called before
    /// `on_channel_connected`, and only when credentials are available.
    fn on_peer_verified(&mut self, _pid: ProcessId) {}
}

impl<T: Listener + ?Sized> Listener for Box<T> {
    fn on_message_received(&mut self, message: Message) {
        (**self).on_message_received(message)
    }

    fn on_channel_connected(&mut self, peer_pid: ProcessId) {
        (**self).on_channel_connected(peer_pid)
    }

    fn on_channel_error(&mut self) {
        (**self).on_channel_error()
    }

    fn on_peer_verified(&mut self, pid: ProcessId) {
        (**self).on_peer_verified(pid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Unopened,
    Connecting,
    Connected,
    Closed,
    Errored,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Errored)
    }
}

/// Identifier of a named channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Fresh, unpredictable id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Socket path of this channel under `dir`
    pub fn socket_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.sock", self.0.simple()))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Construction options shared by every channel of a process
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Process id announced to peers
    pub local_pid: ProcessId,
    pub settings: ChannelSettings,
    /// Directory for named channel sockets
    pub socket_dir: PathBuf,
    /// Notified whenever an event is queued for dispatch
    pub waker: Option<Arc<Notify>>,
    /// Allow dispatch from any thread
    pub relaxed_threading: bool,
}

impl ChannelOptions {
    pub fn new(local_pid: ProcessId) -> Self {
        let config = IpcConfig::default();
        Self::from_config(&config, local_pid)
    }

    pub fn from_config(config: &IpcConfig, local_pid: ProcessId) -> Self {
        Self {
            local_pid,
            settings: config.channel.clone(),
            socket_dir: config.global.socket_dir.clone(),
            waker: None,
            relaxed_threading: config.runtime.allow_non_main_thread_use,
        }
    }

    pub fn with_waker(mut self, waker: Arc<Notify>) -> Self {
        self.waker = Some(waker);
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn with_relaxed_threading(mut self, relaxed: bool) -> Self {
        self.relaxed_threading = relaxed;
        self
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::new(ProcessId::current())
    }
}

enum Endpoint {
    Descriptor(TransportDescriptor),
    Named { id: ChannelId, mode: TransportMode },
}

/// Clonable send-only handle on a channel
///
/// Does not keep the channel's link alive; sends fail once the channel is
/// closed or errored.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    queues: WeakQueues,
}

impl ChannelSender {
    pub fn send(&self, message: Message) -> bool {
        match self.queues.upgrade() {
            Some(queues) => queues.try_send(message).is_ok(),
            None => false,
        }
    }
}

/// Connection to one peer process, bound to one listener
pub struct Channel<L: Listener> {
    state: ChannelState,
    endpoint: Option<Endpoint>,
    named_id: Option<ChannelId>,
    options: ChannelOptions,
    listener: L,
    link: Option<LinkHandle>,
    inbound_tx: mpsc::UnboundedSender<LinkEvent>,
    inbound_rx: mpsc::UnboundedReceiver<LinkEvent>,
    binding: ThreadBinding,
    peer_pid: Option<ProcessId>,
    peer_credentials: Option<ProcessId>,
    metrics: LinkMetrics,
}

impl<L: Listener> Channel<L> {
    fn with_endpoint(endpoint: Endpoint, listener: L, options: ChannelOptions) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let binding = if options.relaxed_threading {
            ThreadBinding::relaxed()
        } else {
            ThreadBinding::current()
        };
        let named_id = match &endpoint {
            Endpoint::Named { id, .. } => Some(*id),
            Endpoint::Descriptor(_) => None,
        };

        Self {
            state: ChannelState::Unopened,
            endpoint: Some(endpoint),
            named_id,
            options,
            listener,
            link: None,
            inbound_tx,
            inbound_rx,
            binding,
            peer_pid: None,
            peer_credentials: None,
            metrics: LinkMetrics::new(),
        }
    }

    /// Channel over an already created transport descriptor
    pub fn new(descriptor: TransportDescriptor, listener: L, options: ChannelOptions) -> Self {
        Self::with_endpoint(Endpoint::Descriptor(descriptor), listener, options)
    }

    /// Channel over a named socket; the server binds, the client connects
    pub fn named(id: ChannelId, mode: TransportMode, listener: L, options: ChannelOptions) -> Self {
        Self::with_endpoint(Endpoint::Named { id, mode }, listener, options)
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Peer process id, known once its `HELLO` has been dispatched
    pub fn peer_pid(&self) -> Option<ProcessId> {
        self.peer_pid
    }

    /// Peer pid as reported by the kernel rather than the peer
    pub fn peer_credentials(&self) -> Option<ProcessId> {
        self.peer_credentials
    }

    pub fn local_pid(&self) -> ProcessId {
        self.options.local_pid
    }

    pub fn named_id(&self) -> Option<ChannelId> {
        self.named_id
    }

    /// Socket path of a named channel
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.named_id
            .map(|id| id.socket_path(&self.options.socket_dir))
    }

    pub fn binding(&self) -> ThreadBinding {
        self.binding
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Open the underlying transport. Must run inside a tokio runtime.
    ///
    /// A failure leaves the channel `Errored` and notifies the listener's
    /// `on_channel_error` once before returning the error.
    pub fn connect(&mut self) -> Result<()> {
        self.binding.check("connect")?;
        match self.state {
            ChannelState::Unopened | ChannelState::Connecting => {}
            ChannelState::Connected => return Ok(()),
            ChannelState::Closed | ChannelState::Errored => {
                return Err(TransportError::closed("connect"));
            }
        }

        self.state = ChannelState::Connecting;
        match self.open_link() {
            Ok(link) => {
                self.link = Some(link);
                self.state = ChannelState::Connected;
                info!(local_pid = %self.options.local_pid, "Channel connected");
                Ok(())
            }
            Err(e) => {
                warn!(local_pid = %self.options.local_pid, error = %e, "Channel connect failed");
                self.state = ChannelState::Errored;
                self.listener.on_channel_error();
                Err(e)
            }
        }
    }

    fn open_link(&mut self) -> Result<LinkHandle> {
        let endpoint = self.endpoint.take().ok_or_else(|| {
            TransportError::configuration("Channel has no transport to open", Some("endpoint"))
        })?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TransportError::configuration(
                "Channel connect requires a tokio runtime",
                None,
            ));
        }

        let source = match endpoint {
            Endpoint::Descriptor(descriptor) => LinkSource::Stream(descriptor.into_owned_fd()),
            Endpoint::Named { id, mode } => {
                let path = id.socket_path(&self.options.socket_dir);
                match mode {
                    TransportMode::Server => LinkSource::Listener(bind_named(&path)?),
                    TransportMode::Client => LinkSource::Stream(connect_named(&path)?),
                }
            }
        };

        let sink = EventSink::new(self.inbound_tx.clone(), self.options.waker.clone());
        Ok(spawn_link(
            source,
            self.options.local_pid,
            &self.options.settings,
            sink,
            self.metrics.clone(),
        ))
    }

    /// Queue a message for delivery
    ///
    /// Returns false when the channel is not connected or its outbound
    /// queue is full; the message is dropped, descriptors included.
    pub fn send(&self, message: Message) -> bool {
        let Some(link) = self.link.as_ref().filter(|_| self.is_connected()) else {
            debug!(state = ?self.state, "Send on unconnected channel dropped");
            return false;
        };

        match link.queues().try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Channel send failed");
                false
            }
        }
    }

    /// Reserve an outbound slot, guaranteeing a later send succeeds
    pub fn reserve(&self, priority: Priority) -> Result<SendPermit> {
        match self.link.as_ref().filter(|_| self.is_connected()) {
            Some(link) => link.queues().try_reserve(priority),
            None => Err(TransportError::closed("reserve")),
        }
    }

    /// Deliver a message to this channel's own listener, through the same
    /// dispatch path as messages from the peer
    pub fn echo(&self, message: Message) -> bool {
        if !self.is_connected() {
            debug!(state = ?self.state, "Echo on unconnected channel dropped");
            return false;
        }
        let sink = EventSink::new(self.inbound_tx.clone(), self.options.waker.clone());
        sink.post(LinkEvent::Message(message))
    }

    /// Send-only handle usable without borrowing the channel
    pub fn sender(&self) -> Option<ChannelSender> {
        self.link.as_ref().map(|link| ChannelSender {
            queues: link.queues().downgrade(),
        })
    }

    /// Close the channel. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        let was = self.state;
        self.state = ChannelState::Closed;
        self.link = None;
        if let Some(Endpoint::Descriptor(descriptor)) = self.endpoint.take() {
            descriptor.close();
        }
        // Undelivered events die with the channel
        while self.inbound_rx.try_recv().is_ok() {}

        info!(local_pid = %self.options.local_pid, from = ?was, "Channel closed");
    }

    /// Close the channel and hand back its listener
    pub fn into_listener(mut self) -> L {
        self.close();
        self.listener
    }

    /// Deliver every queued event to the listener
    ///
    /// Returns how many events were delivered.
    pub fn dispatch_pending(&mut self) -> Result<usize> {
        self.binding.check("dispatch")?;
        let mut delivered = 0;
        while !self.state.is_terminal() {
            match self.inbound_rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    delivered += 1;
                }
                Err(_) => break,
            }
        }
        Ok(delivered)
    }

    /// Wait for the next event and deliver it
    ///
    /// Returns false once the channel is closed or errored.
    pub async fn dispatch_next(&mut self) -> Result<bool> {
        self.binding.check("dispatch")?;
        if self.state.is_terminal() {
            return Ok(false);
        }
        if let Some(event) = self.inbound_rx.recv().await {
            self.handle_event(event);
        }
        Ok(!self.state.is_terminal())
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected {
                announced: peer_pid,
                credentials,
            } => {
                debug!(%peer_pid, ?credentials, "Channel peer said hello");
                self.peer_pid = Some(peer_pid);
                self.peer_credentials = credentials;
                if let Some(pid) = credentials {
                    self.listener.on_peer_verified(pid);
                }
                self.listener.on_channel_connected(peer_pid);
            }
            LinkEvent::Message(message) => {
                trace!(routing = %message.routing(), msg_type = message.msg_type(), "Dispatching message");
                self.listener.on_message_received(message);
            }
            LinkEvent::Error(e) => {
                warn!(error = %e, peer_pid = ?self.peer_pid, "Channel error");
                self.state = ChannelState::Errored;
                self.link = None;
                while self.inbound_rx.try_recv().is_ok() {}
                self.listener.on_channel_error();
            }
        }
    }
}

impl<L: Listener> fmt::Debug for Channel<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("state", &self.state)
            .field("local_pid", &self.options.local_pid)
            .field("peer_pid", &self.peer_pid)
            .field("named_id", &self.named_id)
            .finish()
    }
}
