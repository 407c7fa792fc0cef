//! Process Supervisor
//!
//! Owns one spawned child process and its primary channel. Process exit is
//! watched independently of the channel, since a crashed child never closes
//! its socket cleanly. What to do about an exit is the owner's business;
//! the supervisor only reports it.

pub mod registry;

pub use registry::{Registration, SupervisorId, SupervisorInfo, SupervisorRegistry};

use crate::error::Result;
use crate::fatal::FailureReporter;
use ipc_network::{
    unpack_channel_opened, Channel, ChannelId, ChannelOpened, ChannelOptions, Listener, Message,
    ProcessId, ThreadBinding, TransportDescriptor, TransportMode, CHANNEL_OPENED_MESSAGE_TYPE,
};
use serde::{Deserialize, Serialize};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PROTOCOL_NAME: &str = "ProcessSupervisor";

/// What a supervised process is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    Content,
    Gpu,
    Plugin,
    MediaPlugin,
    Utility,
    Test,
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub pid: Option<ProcessId>,
    /// Exit code, when the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, when it did not
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(pid: Option<ProcessId>, status: ExitStatus) -> Self {
        Self {
            pid,
            code: status.code(),
            signal: status.signal(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Owner-side callbacks of a supervisor
pub trait SupervisorListener: Send {
    /// Application traffic on the primary channel
    fn on_message_received(&mut self, _message: Message) {}

    fn on_channel_connected(&mut self, _peer_pid: ProcessId) {}

    fn on_channel_error(&mut self) {}

    /// The child handed us one end of a new transport
    fn on_channel_opened(&mut self, opened: ChannelOpened) {
        debug!(protocol = %opened.protocol, "Unclaimed ChannelOpened; closing descriptor");
        opened.descriptor.close();
    }

    fn on_process_exited(&mut self, _exit: ExitInfo) {}
}

/// Listener bound to the primary channel
pub struct SupervisorHook {
    listener: Box<dyn SupervisorListener>,
    reporter: FailureReporter,
    opening: bool,
    failed: bool,
    peer_pid: Option<ProcessId>,
    verified_pid: Option<ProcessId>,
    process_pid: Option<ProcessId>,
}

impl SupervisorHook {
    fn new(listener: Box<dyn SupervisorListener>, reporter: FailureReporter) -> Self {
        Self {
            listener,
            reporter,
            opening: false,
            failed: false,
            peer_pid: None,
            verified_pid: None,
            process_pid: None,
        }
    }

    fn reset(&mut self) {
        self.opening = false;
        self.failed = false;
        self.peer_pid = None;
        self.verified_pid = None;
    }

    /// The child we spawned, else the kernel-reported peer. The pid a
    /// peer announces in its `HELLO` is never a kill target.
    fn peer_for_kill(&self) -> ProcessId {
        self.process_pid
            .or(self.verified_pid)
            .unwrap_or(ProcessId::INVALID)
    }

    fn fatal(&mut self, message: &str) {
        self.failed = true;
        self.reporter
            .fatal_error(PROTOCOL_NAME, message, self.peer_for_kill(), true);
    }

    fn handle_control(&mut self, message: Message) {
        match message.msg_type() {
            CHANNEL_OPENED_MESSAGE_TYPE => match unpack_channel_opened(message) {
                Ok(opened) => self.listener.on_channel_opened(opened),
                Err(e) => self.fatal(&format!("malformed ChannelOpened: {}", e)),
            },
            other => self.fatal(&format!("unexpected control message type {}", other)),
        }
    }
}

impl Listener for SupervisorHook {
    fn on_message_received(&mut self, message: Message) {
        if self.failed {
            return;
        }
        if message.is_control() {
            self.handle_control(message);
        } else {
            self.listener.on_message_received(message);
        }
    }

    fn on_channel_connected(&mut self, peer_pid: ProcessId) {
        self.opening = false;
        self.peer_pid = Some(peer_pid);
        self.listener.on_channel_connected(peer_pid);
    }

    fn on_channel_error(&mut self) {
        self.opening = false;
        self.listener.on_channel_error();
    }

    fn on_peer_verified(&mut self, pid: ProcessId) {
        self.verified_pid = Some(pid);
    }
}

enum HookSlot {
    Idle(SupervisorHook),
    Bound(Channel<SupervisorHook>),
}

pub struct ProcessSupervisor {
    kind: ProcessKind,
    options: ChannelOptions,
    binding: ThreadBinding,
    /// Always `Some` outside `install`
    slot: Option<HookSlot>,
    pid: Option<ProcessId>,
    exit_tx: mpsc::UnboundedSender<ExitInfo>,
    exit_rx: mpsc::UnboundedReceiver<ExitInfo>,
    watcher: Option<JoinHandle<()>>,
    registration: Registration,
}

impl ProcessSupervisor {
    pub fn new(
        kind: ProcessKind,
        listener: Box<dyn SupervisorListener>,
        reporter: FailureReporter,
        registry: &SupervisorRegistry,
        options: ChannelOptions,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let binding = if options.relaxed_threading {
            ThreadBinding::relaxed()
        } else {
            ThreadBinding::current()
        };
        Self {
            kind,
            binding,
            slot: Some(HookSlot::Idle(SupervisorHook::new(listener, reporter))),
            pid: None,
            exit_tx,
            exit_rx,
            watcher: None,
            registration: registry.register(kind),
            options,
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn id(&self) -> SupervisorId {
        self.registration.id()
    }

    pub fn channel(&self) -> Option<&Channel<SupervisorHook>> {
        match &self.slot {
            Some(HookSlot::Bound(channel)) => Some(channel),
            _ => None,
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel().and_then(Channel::named_id)
    }

    /// Where the child should connect, for a named primary channel
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.channel().and_then(Channel::socket_path)
    }

    fn hook(&self) -> Option<&SupervisorHook> {
        match &self.slot {
            Some(HookSlot::Idle(hook)) => Some(hook),
            Some(HookSlot::Bound(channel)) => Some(channel.listener()),
            None => None,
        }
    }

    fn hook_mut(&mut self) -> Option<&mut SupervisorHook> {
        match &mut self.slot {
            Some(HookSlot::Idle(hook)) => Some(hook),
            Some(HookSlot::Bound(channel)) => Some(channel.listener_mut()),
            None => None,
        }
    }

    /// True between a successful channel creation and the first connect
    /// or error on it
    pub fn is_opening(&self) -> bool {
        self.hook().is_some_and(|hook| hook.opening)
    }

    /// Create a named server channel under a fresh id
    pub fn create_channel(&mut self) -> Result<ChannelId> {
        let id = ChannelId::generate();
        self.install(|hook, options| Channel::named(id, TransportMode::Server, hook, options))?;
        info!(kind = ?self.kind, channel_id = %id, "Supervisor channel listening");
        Ok(id)
    }

    /// Create the primary channel over a descriptor the child already holds
    /// the other end of
    pub fn create_channel_from(&mut self, descriptor: TransportDescriptor) -> Result<()> {
        self.install(|hook, options| Channel::new(descriptor, hook, options))?;
        info!(kind = ?self.kind, "Supervisor channel adopted descriptor");
        Ok(())
    }

    fn install<F>(&mut self, build: F) -> Result<()>
    where
        F: FnOnce(SupervisorHook, ChannelOptions) -> Channel<SupervisorHook>,
    {
        let mut hook = match self.slot.take() {
            Some(HookSlot::Bound(previous)) => {
                debug!(kind = ?self.kind, "Closing previous supervisor channel");
                previous.into_listener()
            }
            Some(HookSlot::Idle(hook)) => hook,
            None => {
                return Err(ipc_network::TransportError::closed("create_channel").into());
            }
        };
        self.registration.update_channel(None, None);
        hook.reset();

        let mut channel = build(hook, self.options.clone());
        match channel.connect() {
            Ok(()) => {
                channel.listener_mut().opening = true;
                self.registration
                    .update_channel(channel.named_id(), channel.sender());
                self.slot = Some(HookSlot::Bound(channel));
                Ok(())
            }
            Err(e) => {
                warn!(kind = ?self.kind, error = %e, "Supervisor channel creation failed");
                self.slot = Some(HookSlot::Idle(channel.into_listener()));
                Err(e.into())
            }
        }
    }

    /// Start watching `child` for exit
    ///
    /// Without a tokio runtime, or for a child that was already reaped, no
    /// watcher is started and no exit will be reported.
    pub fn set_handle(&mut self, mut child: Child) {
        if let Some(previous) = self.watcher.take() {
            previous.abort();
        }

        let pid = child.id().map(ProcessId::from_raw);
        self.pid = pid;
        self.registration.update_pid(pid);
        if let Some(hook) = self.hook_mut() {
            hook.process_pid = pid;
        }

        let Some(pid) = pid else {
            warn!(kind = ?self.kind, "Child already reaped; not watching");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(kind = ?self.kind, %pid, "No runtime to watch child exit");
            return;
        };

        let exits = self.exit_tx.clone();
        let waker = self.options.waker.clone();
        self.watcher = Some(runtime.spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let exit = ExitInfo::from_status(Some(pid), status);
                    info!(%pid, ?exit, "Supervised process exited");
                    if exits.send(exit).is_ok() {
                        if let Some(waker) = waker {
                            waker.notify_one();
                        }
                    }
                }
                Err(e) => warn!(%pid, error = %e, "Failed waiting for supervised process"),
            }
        }));
        debug!(kind = ?self.kind, %pid, "Watching supervised process");
    }

    /// Send on the primary channel. Without one the message is dropped,
    /// descriptors included, and false is returned.
    pub fn send(&self, message: Message) -> bool {
        match self.channel() {
            Some(channel) => channel.send(message),
            None => {
                debug!(kind = ?self.kind, "Supervisor has no channel; message dropped");
                false
            }
        }
    }

    /// Deliver queued process-exit and channel events to the listener
    ///
    /// A protocol violation on the primary channel closes it after the
    /// violation has been reported.
    pub fn dispatch_pending(&mut self) -> Result<usize> {
        self.binding.check("dispatch")?;
        let mut delivered = 0;

        while let Ok(exit) = self.exit_rx.try_recv() {
            if let Some(hook) = self.hook_mut() {
                hook.listener.on_process_exited(exit);
            }
            delivered += 1;
        }

        if let Some(HookSlot::Bound(channel)) = self.slot.as_mut() {
            delivered += channel.dispatch_pending()?;
            if channel.listener().failed {
                channel.close();
                self.registration.update_channel(channel.named_id(), None);
            }
        }
        Ok(delivered)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("channel", &self.channel().map(Channel::state))
            .field("opening", &self.is_opening())
            .finish()
    }
}
