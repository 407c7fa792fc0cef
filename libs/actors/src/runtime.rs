//! Actor Runtime
//!
//! One `ActorRuntime` per process owns the top-level actor registry and
//! every actor channel. The owner drives it from the owning thread with
//! `dispatch_pending`, which pumps all channels and then handles what they
//! delivered:
//!
//! - `ChannelOpened` control messages open the carried descriptor and
//!   register a new actor as opened by the actor that received them
//! - application messages go to the actor's protocol handler
//! - a handler's `ProtocolViolation`, or any unexpected control message, is
//!   fatal: it goes to the `FailureReporter` and the actor is destroyed
//! - a channel error destroys the actor and everything it opened

use crate::bridge;
use crate::error::{ActorError, Result};
use crate::fatal::FailureReporter;
use crate::protocol::{CloneContext, ProtocolTable, TeardownReason};
use crate::registry::{ActorKey, ToplevelRegistry};
use crate::toplevel::{ActorEvent, ActorEventKind, ActorHook, FdMappings, TopLevelActor};
use ipc_config::IpcConfig;
use ipc_network::{
    unpack_channel_opened, Channel, ChannelOpened, ChannelOptions, Message, ProcessId, ProtocolId,
    ThreadBinding, TransportDescriptor, TransportFactory, TransportMode,
    CHANNEL_OPENED_MESSAGE_TYPE,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};

/// Runtime-wide counters
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub actors_opened: AtomicU64,
    pub actors_destroyed: AtomicU64,
    pub messages_dispatched: AtomicU64,
    pub fatal_errors: AtomicU64,
    pub bridges: AtomicU64,
    pub opens: AtomicU64,
}

impl RuntimeMetrics {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Actors currently alive according to the counters
    pub fn live_actors(&self) -> u64 {
        let opened = self.actors_opened.load(Ordering::Relaxed);
        opened.saturating_sub(self.actors_destroyed.load(Ordering::Relaxed))
    }
}

pub struct ActorRuntime {
    local_pid: ProcessId,
    options: ChannelOptions,
    registry: ToplevelRegistry,
    protocols: ProtocolTable,
    factory: Arc<dyn TransportFactory>,
    reporter: FailureReporter,
    events_tx: mpsc::UnboundedSender<ActorEvent>,
    events_rx: mpsc::UnboundedReceiver<ActorEvent>,
    waker: Arc<Notify>,
    binding: ThreadBinding,
    metrics: Arc<RuntimeMetrics>,
}

impl ActorRuntime {
    pub fn new(
        local_pid: ProcessId,
        protocols: ProtocolTable,
        factory: Arc<dyn TransportFactory>,
        reporter: FailureReporter,
    ) -> Self {
        Self::with_options(ChannelOptions::new(local_pid), protocols, factory, reporter)
    }

    pub fn from_config(
        config: &IpcConfig,
        local_pid: ProcessId,
        protocols: ProtocolTable,
        factory: Arc<dyn TransportFactory>,
        reporter: FailureReporter,
    ) -> Self {
        Self::with_options(
            ChannelOptions::from_config(config, local_pid),
            protocols,
            factory,
            reporter,
        )
    }

    pub fn with_options(
        options: ChannelOptions,
        protocols: ProtocolTable,
        factory: Arc<dyn TransportFactory>,
        reporter: FailureReporter,
    ) -> Self {
        let waker = Arc::new(Notify::new());
        let options = options.with_waker(Arc::clone(&waker));
        let binding = if options.relaxed_threading {
            ThreadBinding::relaxed()
        } else {
            ThreadBinding::current()
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(local_pid = %options.local_pid, protocols = protocols.len(), "Actor runtime created");
        Self {
            local_pid: options.local_pid,
            options,
            registry: ToplevelRegistry::new(),
            protocols,
            factory,
            reporter,
            events_tx,
            events_rx,
            waker,
            binding,
            metrics: Arc::new(RuntimeMetrics::default()),
        }
    }

    pub fn local_pid(&self) -> ProcessId {
        self.local_pid
    }

    pub fn registry(&self) -> &ToplevelRegistry {
        &self.registry
    }

    pub fn protocols(&self) -> &ProtocolTable {
        &self.protocols
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    pub fn actor(&self, key: ActorKey) -> Option<&TopLevelActor> {
        self.registry.get(key)
    }

    /// Actors opened by `key`, in the order they were opened
    pub fn opened_actors(&self, key: ActorKey) -> Vec<ActorKey> {
        self.registry.opened_actors(key).collect()
    }

    pub fn actors_with_protocol(&self, protocol: ProtocolId) -> Vec<ActorKey> {
        self.registry
            .keys()
            .into_iter()
            .filter(|key| {
                self.registry
                    .get(*key)
                    .is_some_and(|actor| actor.protocol() == protocol)
            })
            .collect()
    }

    /// Resolves once any owned channel has something to dispatch
    pub async fn wait_for_activity(&self) {
        self.waker.notified().await;
    }

    /// Owning-thread check, lifted for actors whose protocol allows it
    fn check_thread(&self, keys: &[ActorKey], operation: &str) -> Result<()> {
        let relaxed = !keys.is_empty()
            && keys.iter().all(|key| {
                self.registry
                    .get(*key)
                    .is_some_and(TopLevelActor::allows_non_main_thread_use)
            });
        if relaxed {
            return Ok(());
        }
        self.binding.check(operation)?;
        Ok(())
    }

    fn channel_options(&self, relaxed: bool) -> ChannelOptions {
        let relaxed = relaxed || self.options.relaxed_threading;
        self.options.clone().with_relaxed_threading(relaxed)
    }

    /// Register a root actor over a transport this process already holds
    pub fn adopt_channel(
        &mut self,
        descriptor: TransportDescriptor,
        protocol: ProtocolId,
        peer_pid: ProcessId,
    ) -> Result<ActorKey> {
        self.binding.check("adopt_channel")?;
        let Some(factory) = self.protocols.get(protocol).cloned() else {
            descriptor.close();
            return Err(ActorError::UnknownProtocol(protocol));
        };

        let relaxed = factory.allow_non_main_thread_use() || self.options.relaxed_threading;
        let actor = TopLevelActor::new(protocol, peer_pid, factory.side(), factory.create(peer_pid))
            .with_non_main_thread_use(relaxed);
        let key = self.registry.insert(actor);
        self.connect_actor(key, descriptor)?;
        info!(actor = %key, %protocol, %peer_pid, "Root actor adopted channel");
        Ok(key)
    }

    /// Open `descriptor` as the channel of the freshly inserted actor `key`
    ///
    /// On failure the actor sees a channel error and is destroyed.
    fn connect_actor(&mut self, key: ActorKey, descriptor: TransportDescriptor) -> Result<()> {
        let relaxed = self
            .registry
            .get(key)
            .is_some_and(TopLevelActor::allows_non_main_thread_use);
        let hook = ActorHook::new(key, self.events_tx.clone());
        let mut channel = Channel::new(descriptor, hook, self.channel_options(relaxed));

        match channel.connect() {
            Ok(()) => {
                if let Some(actor) = self.registry.get_mut(key) {
                    actor.attach_channel(channel);
                }
                RuntimeMetrics::bump(&self.metrics.actors_opened, 1);
                Ok(())
            }
            Err(e) => {
                warn!(actor = %key, error = %e, "Actor channel failed to connect");
                RuntimeMetrics::bump(&self.metrics.actors_opened, 1);
                if let Some(actor) = self.registry.get_mut(key) {
                    actor.channel_error();
                }
                self.destroy_with(key, TeardownReason::ChannelError);
                Err(e.into())
            }
        }
    }

    /// Pump every actor channel and handle what arrived
    ///
    /// Returns how many events were handled.
    pub fn dispatch_pending(&mut self) -> Result<usize> {
        let keys = self.registry.keys();
        self.check_thread(&keys, "dispatch")?;

        let mut handled = 0;
        loop {
            for key in self.registry.keys() {
                if let Some(channel) = self.registry.get_mut(key).and_then(TopLevelActor::channel_mut) {
                    channel.dispatch_pending()?;
                }
            }

            let mut progressed = false;
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
                handled += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        Ok(handled)
    }

    fn handle_event(&mut self, event: ActorEvent) {
        let ActorEvent { key, kind } = event;
        let Some(actor) = self.registry.get_mut(key) else {
            trace!(actor = %key, "Event for destroyed actor dropped");
            return;
        };

        match kind {
            ActorEventKind::Connected(peer_pid) => {
                debug!(actor = %key, %peer_pid, "Actor channel connected");
                actor.connected(key, peer_pid);
            }
            ActorEventKind::Message(message) if message.is_control() => {
                self.handle_control(key, message);
            }
            ActorEventKind::Message(message) => {
                RuntimeMetrics::bump(&self.metrics.messages_dispatched, 1);
                if let Err(violation) = actor.deliver(key, message) {
                    self.fatal(key, violation.message());
                }
            }
            ActorEventKind::Error => {
                actor.channel_error();
                self.destroy_with(key, TeardownReason::ChannelError);
            }
        }
    }

    fn handle_control(&mut self, key: ActorKey, message: Message) {
        match message.msg_type() {
            CHANNEL_OPENED_MESSAGE_TYPE => match unpack_channel_opened(message) {
                Ok(opened) => self.open_channel(key, opened),
                Err(e) => self.fatal(key, &format!("malformed ChannelOpened: {}", e)),
            },
            other => self.fatal(key, &format!("unexpected control message type {}", other)),
        }
    }

    /// Instantiate the actor a `ChannelOpened` asks for, opened by `opener`
    fn open_channel(&mut self, opener: ActorKey, opened: ChannelOpened) {
        let ChannelOpened {
            descriptor,
            peer_pid,
            protocol,
            ..
        } = opened;

        let Some(factory) = self.protocols.get(protocol).cloned() else {
            descriptor.close();
            self.fatal(opener, &format!("ChannelOpened for unknown {}", protocol));
            return;
        };

        let relaxed = factory.allow_non_main_thread_use() || self.options.relaxed_threading;
        let actor = TopLevelActor::new(protocol, peer_pid, factory.side(), factory.create(peer_pid))
            .with_non_main_thread_use(relaxed);
        let key = self.registry.insert(actor);
        if let Err(e) = self.registry.add_opened_actor(opener, key) {
            warn!(%opener, actor = %key, error = %e, "Could not record opened actor");
            descriptor.close();
            self.destroy_with(key, TeardownReason::Requested);
            return;
        }

        if self.connect_actor(key, descriptor).is_ok() {
            info!(%opener, actor = %key, %protocol, %peer_pid, "Opened actor from ChannelOpened");
        }
    }

    fn fatal(&mut self, key: ActorKey, message: &str) {
        let Some(actor) = self.registry.get(key) else {
            return;
        };
        RuntimeMetrics::bump(&self.metrics.fatal_errors, 1);
        let name = self.protocols.name_of(actor.protocol()).to_string();
        self.reporter
            .fatal_error(&name, message, actor.peer_pid(), actor.side().is_parent());
        self.destroy_with(key, TeardownReason::FatalError);
    }

    fn destroy_with(&mut self, key: ActorKey, reason: TeardownReason) -> usize {
        match self.registry.destroy(key, reason) {
            Ok(destroyed) => {
                RuntimeMetrics::bump(&self.metrics.actors_destroyed, destroyed as u64);
                destroyed
            }
            Err(e) => {
                debug!(actor = %key, error = %e, "Destroy skipped");
                0
            }
        }
    }

    /// Destroy an actor and everything it opened
    pub fn destroy(&mut self, key: ActorKey) -> Result<usize> {
        self.check_thread(&[key], "destroy")?;
        if !self.registry.contains(key) {
            return Err(ActorError::UnknownActor(key));
        }
        Ok(self.destroy_with(key, TeardownReason::Requested))
    }

    /// Send on an actor's channel
    pub fn send(&self, key: ActorKey, message: Message) -> bool {
        self.registry
            .get(key)
            .and_then(TopLevelActor::channel)
            .is_some_and(|channel| channel.send(message))
    }

    fn require_protocols(&self, protocols: [ProtocolId; 2]) -> Result<()> {
        match protocols.into_iter().find(|id| !self.protocols.contains(*id)) {
            Some(missing) => Err(ActorError::UnknownProtocol(missing)),
            None => Ok(()),
        }
    }

    /// Connect the peers behind `parent` and `child` directly
    ///
    /// `Ok(false)` means the handshake could not be sent and nothing was
    /// created on either side.
    pub fn bridge(
        &mut self,
        parent: ActorKey,
        child: ActorKey,
        protocol: ProtocolId,
        child_protocol: ProtocolId,
    ) -> Result<bool> {
        self.check_thread(&[parent, child], "bridge")?;
        self.require_protocols([protocol, child_protocol])?;
        let parent_actor = self.registry.get(parent).ok_or(ActorError::UnknownActor(parent))?;
        let child_actor = self.registry.get(child).ok_or(ActorError::UnknownActor(child))?;
        let (Some(parent_channel), Some(child_channel)) =
            (parent_actor.channel(), child_actor.channel())
        else {
            return Ok(false);
        };

        let sent = bridge::bridge(
            self.factory.as_ref(),
            parent_channel,
            parent_actor.peer_pid(),
            child_channel,
            child_actor.peer_pid(),
            protocol,
            child_protocol,
        );
        if sent {
            RuntimeMetrics::bump(&self.metrics.bridges, 1);
        }
        Ok(sent)
    }

    /// Open a second channel to the peer of `opener`
    ///
    /// Our end arrives through our own dispatch path and becomes an actor
    /// opened by `opener`.
    pub fn open(
        &mut self,
        opener: ActorKey,
        mode: TransportMode,
        protocol: ProtocolId,
        child_protocol: ProtocolId,
    ) -> Result<bool> {
        self.check_thread(&[opener], "open")?;
        self.require_protocols([protocol, child_protocol])?;
        let actor = self.registry.get(opener).ok_or(ActorError::UnknownActor(opener))?;
        let Some(channel) = actor.channel() else {
            return Ok(false);
        };

        let sent = bridge::open(
            self.factory.as_ref(),
            channel,
            self.local_pid,
            actor.peer_pid(),
            mode,
            protocol,
            child_protocol,
        );
        if sent {
            RuntimeMetrics::bump(&self.metrics.opens, 1);
        }
        Ok(sent)
    }

    /// Clone everything `template` opened under `target`, one channel per
    /// clone taken from `fds`
    ///
    /// Fails without leaving any clone behind.
    pub fn clone_opened_toplevels(
        &mut self,
        template: ActorKey,
        target: ActorKey,
        fds: &mut FdMappings,
        cx: &CloneContext,
    ) -> Result<Vec<ActorKey>> {
        self.check_thread(&[template, target], "clone")?;
        let clones = self
            .registry
            .clone_opened_toplevels(template, target, fds, cx)?;

        for key in &clones {
            let descriptor = self
                .registry
                .get_mut(*key)
                .and_then(TopLevelActor::take_pending_descriptor);
            let connected = match descriptor {
                Some(descriptor) => self.connect_actor(*key, descriptor),
                None => Err(ActorError::UnknownActor(*key)),
            };
            if let Err(e) = connected {
                for clone in &clones {
                    self.destroy_with(*clone, TeardownReason::Requested);
                }
                return Err(e);
            }
        }
        info!(%template, %target, clones = clones.len(), "Cloned opened actors");
        Ok(clones)
    }

    /// Tear down every actor, children before the actors that opened them
    pub fn shutdown(&mut self) -> usize {
        let roots: Vec<ActorKey> = self
            .registry
            .keys()
            .into_iter()
            .filter(|key| self.registry.opener_of(*key).is_none())
            .collect();
        let destroyed = roots
            .into_iter()
            .map(|key| self.destroy_with(key, TeardownReason::Requested))
            .sum();
        if destroyed > 0 {
            info!(local_pid = %self.local_pid, destroyed, "Actor runtime shut down");
        }
        destroyed
    }
}

impl Drop for ActorRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ActorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRuntime")
            .field("local_pid", &self.local_pid)
            .field("actors", &self.registry.len())
            .field("protocols", &self.protocols)
            .finish()
    }
}
