//! Unix Domain Socket Link
//!
//! Moves framed messages and their attached descriptors over a connected
//! Unix stream socket. Each link runs one driver task that owns the socket:
//! it writes a `HELLO` frame carrying the local process id, spawns the
//! reader, then drains the outbound queues (urgent first) until every
//! sender is gone.
//!
//! Descriptors travel as `SCM_RIGHTS` on the first `sendmsg` of their
//! frame. The kernel never merges two descriptor batches into one read, so
//! the reader can queue what it receives and hand descriptors to frames by
//! the count in their header.

use crate::message::{Message, Priority};
use crate::process::ProcessId;
use crate::protocol::{encode_frame, EncodedFrame, FrameDecoder, FrameLimits, HELLO_MESSAGE_TYPE};
use crate::transports::LinkMetrics;
use crate::{Result, TransportError};
use bytes::Bytes;
use ipc_config::defaults::channel::DESCRIPTOR_LIMIT;
use ipc_config::ChannelSettings;
use nix::sys::socket::{
    getsockopt, recvmsg, sendmsg, sockopt, ControlMessage, ControlMessageOwned, MsgFlags,
};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::Interest;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, trace, warn};

/// Activity surfaced by a link to its owning channel
#[derive(Debug)]
pub enum LinkEvent {
    /// The peer's `HELLO` arrived
    Connected {
        /// Pid the peer claims in its `HELLO`
        announced: ProcessId,
        /// Pid the kernel reports for the socket's peer, when it has one
        credentials: Option<ProcessId>,
    },
    /// An application or control message arrived
    Message(Message),
    /// The link failed or the peer went away; no further events follow
    Error(TransportError),
}

/// Delivers link events to the owning thread and wakes it
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
    waker: Option<Arc<Notify>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<LinkEvent>, waker: Option<Arc<Notify>>) -> Self {
        Self { tx, waker }
    }

    /// Post an event; false when the owner has gone away
    pub fn post(&self, event: LinkEvent) -> bool {
        let delivered = self.tx.send(event).is_ok();
        if let Some(waker) = &self.waker {
            waker.notify_one();
        }
        delivered
    }
}

/// Where a link gets its socket from
#[derive(Debug)]
pub enum LinkSource {
    /// An already connected socket
    Stream(OwnedFd),
    /// A bound named socket; the first peer to connect is accepted
    Listener(NamedListener),
}

impl LinkSource {
    async fn into_stream(self) -> Result<UnixStream> {
        match self {
            LinkSource::Stream(fd) => {
                let std_stream = StdUnixStream::from(fd);
                std_stream.set_nonblocking(true)?;
                Ok(UnixStream::from_std(std_stream)?)
            }
            // One peer per named channel; the socket file goes with `named`
            LinkSource::Listener(named) => {
                let (stream, _) = named.listener.accept().await.map_err(|e| {
                    TransportError::connection_with_source("Failed to accept named channel peer", e)
                })?;
                debug!(path = ?named.path, "Accepted named channel peer");
                Ok(stream)
            }
        }
    }
}

/// A bound named socket that owns its socket file
///
/// The file is removed when the listener is dropped: after the peer is
/// accepted, or when the link is shut down before anyone connected.
#[derive(Debug)]
pub struct NamedListener {
    listener: UnixListener,
    path: PathBuf,
}

impl NamedListener {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedListener {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => trace!(path = ?self.path, "Removed named channel socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = ?self.path, error = %e, "Could not remove named channel socket"),
        }
    }
}

/// Bind a named channel socket, replacing any stale socket file
pub fn bind_named(path: &Path) -> Result<NamedListener> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| {
            TransportError::connection_with_source("Failed to remove existing socket", e)
        })?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            TransportError::connection_with_source("Failed to create socket directory", e)
        })?;
    }

    let listener = UnixListener::bind(path)
        .map_err(|e| TransportError::connection_with_source("Failed to bind Unix socket", e))?;
    info!("Named channel listening on: {:?}", path);
    Ok(NamedListener {
        listener,
        path: path.to_path_buf(),
    })
}

/// Connect to a named channel socket
pub fn connect_named(path: &Path) -> Result<OwnedFd> {
    let stream = StdUnixStream::connect(path).map_err(|e| {
        TransportError::connection_with_source(
            format!("Failed to connect to Unix socket: {:?}", path),
            e,
        )
    })?;
    debug!("Connected to named channel: {:?}", path);
    Ok(OwnedFd::from(stream))
}

/// Sending side of a link's two outbound queues
#[derive(Debug, Clone)]
pub struct OutboundQueues {
    urgent: mpsc::Sender<Message>,
    normal: mpsc::Sender<Message>,
    limits: FrameLimits,
}

impl OutboundQueues {
    fn sender(&self, priority: Priority) -> (&mpsc::Sender<Message>, &'static str) {
        if priority.is_urgent() {
            (&self.urgent, "urgent_queue")
        } else {
            (&self.normal, "normal_queue")
        }
    }

    /// Enqueue without waiting
    ///
    /// A message the link could not encode is refused here, so it never
    /// reaches the writer.
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.limits.check(&message)?;
        let (sender, queue) = self.sender(message.priority());
        sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => {
                TransportError::resource_exhausted(queue, "outbound queue full")
            }
            TrySendError::Closed(_) => TransportError::closed("send"),
        })
    }

    /// Reserve one slot in the queue `priority` maps to
    pub fn try_reserve(&self, priority: Priority) -> Result<SendPermit> {
        let (sender, queue) = self.sender(priority);
        let permit = sender.clone().try_reserve_owned().map_err(|e| match e {
            TrySendError::Full(_) => {
                TransportError::resource_exhausted(queue, "outbound queue full")
            }
            TrySendError::Closed(_) => TransportError::closed("reserve"),
        })?;
        Ok(SendPermit {
            permit,
            priority,
            limits: self.limits,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.urgent.is_closed() || self.normal.is_closed()
    }

    /// Handle that does not keep the link's writer alive
    pub fn downgrade(&self) -> WeakQueues {
        WeakQueues {
            urgent: self.urgent.downgrade(),
            normal: self.normal.downgrade(),
            limits: self.limits,
        }
    }
}

/// Non-owning counterpart of `OutboundQueues`
#[derive(Debug, Clone)]
pub struct WeakQueues {
    urgent: mpsc::WeakSender<Message>,
    normal: mpsc::WeakSender<Message>,
    limits: FrameLimits,
}

impl WeakQueues {
    /// `None` once the owning link has been shut down
    pub fn upgrade(&self) -> Option<OutboundQueues> {
        Some(OutboundQueues {
            urgent: self.urgent.upgrade()?,
            normal: self.normal.upgrade()?,
            limits: self.limits,
        })
    }
}

/// A reserved outbound slot
///
/// Sending through it cannot fail for lack of room. A message that breaks
/// the link's frame limits is still refused; `check` tells in advance.
#[derive(Debug)]
pub struct SendPermit {
    permit: OwnedPermit<Message>,
    priority: Priority,
    limits: FrameLimits,
}

impl SendPermit {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether `message` may travel through this permit
    pub fn check(&self, message: &Message) -> Result<()> {
        self.limits.check(message)
    }

    /// Commit `message`; false if it breaks the frame limits, in which
    /// case it is dropped and the slot released
    pub fn send(self, message: Message) -> bool {
        debug_assert_eq!(message.priority().is_urgent(), self.priority.is_urgent());
        if let Err(e) = self.limits.check(&message) {
            warn!(error = %e, "Reserved send refused");
            return false;
        }
        let _sender = self.permit.send(message);
        true
    }
}

/// Owner's handle on a running link
///
/// Dropping the handle stops the reader at once. The writer finishes
/// flushing whatever was already queued, then closes the socket.
#[derive(Debug)]
pub struct LinkHandle {
    queues: OutboundQueues,
    metrics: LinkMetrics,
    _shutdown: oneshot::Sender<()>,
}

impl LinkHandle {
    pub fn queues(&self) -> &OutboundQueues {
        &self.queues
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }
}

/// Start a link on `source`. Must be called inside a tokio runtime.
pub fn spawn_link(
    source: LinkSource,
    local_pid: ProcessId,
    settings: &ChannelSettings,
    sink: EventSink,
    metrics: LinkMetrics,
) -> LinkHandle {
    let (urgent_tx, urgent_rx) = mpsc::channel(settings.urgent_queue_capacity);
    let (normal_tx, normal_rx) = mpsc::channel(settings.normal_queue_capacity);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let driver = LinkDriver {
        local_pid,
        settings: settings.clone(),
        sink,
        metrics: metrics.clone(),
        urgent_rx,
        normal_rx,
    };
    tokio::spawn(driver.run(source, shutdown_rx));

    LinkHandle {
        queues: OutboundQueues {
            urgent: urgent_tx,
            normal: normal_tx,
            limits: FrameLimits::from(settings),
        },
        metrics,
        _shutdown: shutdown_tx,
    }
}

struct LinkDriver {
    local_pid: ProcessId,
    settings: ChannelSettings,
    sink: EventSink,
    metrics: LinkMetrics,
    urgent_rx: mpsc::Receiver<Message>,
    normal_rx: mpsc::Receiver<Message>,
}

impl LinkDriver {
    async fn run(mut self, source: LinkSource, mut shutdown: oneshot::Receiver<()>) {
        let stream = tokio::select! {
            _ = &mut shutdown => return,
            stream = source.into_stream() => stream,
        };
        let stream = match stream {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                self.metrics.record_error(e.category());
                self.sink.post(LinkEvent::Error(e));
                return;
            }
        };

        let credentials = peer_credentials(&stream);
        let pid = Bytes::copy_from_slice(&self.local_pid.as_raw().to_le_bytes());
        let hello = Message::control(HELLO_MESSAGE_TYPE, pid).with_priority(Priority::Urgent);
        if !self.write(&stream, hello).await {
            return;
        }

        let reader = LinkReader {
            decoder: FrameDecoder::new(&self.settings),
            read_buffer_size: self.settings.read_buffer_size,
            sink: self.sink.clone(),
            metrics: self.metrics.clone(),
            peer: None,
            credentials,
        };
        tokio::spawn(reader.run(Arc::clone(&stream), shutdown));

        loop {
            let message = tokio::select! {
                biased;
                Some(message) = self.urgent_rx.recv() => message,
                Some(message) = self.normal_rx.recv() => message,
                else => break,
            };
            if !self.write(&stream, message).await {
                return;
            }
        }
        trace!("Link writer drained");
    }

    async fn write(&self, stream: &UnixStream, message: Message) -> bool {
        let result = match encode_frame(message, &self.settings) {
            Ok(frame) => {
                let bytes = frame.bytes.len();
                let descriptors = frame.descriptors.len();
                write_frame(stream, frame)
                    .await
                    .map(|()| self.metrics.record_send(bytes, descriptors))
                    .map_err(TransportError::from)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Link write failed");
                self.metrics.record_error(e.category());
                self.sink.post(LinkEvent::Error(e));
                false
            }
        }
    }
}

struct LinkReader {
    decoder: FrameDecoder,
    read_buffer_size: usize,
    sink: EventSink,
    metrics: LinkMetrics,
    peer: Option<ProcessId>,
    credentials: Option<ProcessId>,
}

impl LinkReader {
    async fn run(mut self, stream: Arc<UnixStream>, mut shutdown: oneshot::Receiver<()>) {
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut cmsg = nix::cmsg_space!([RawFd; DESCRIPTOR_LIMIT]);

        loop {
            let chunk = tokio::select! {
                _ = &mut shutdown => return,
                chunk = read_chunk(&stream, &mut buf, &mut cmsg) => chunk,
            };

            let outcome = match chunk {
                Ok((0, _)) => Err(TransportError::connection("Peer closed the channel")),
                Ok((n, descriptors)) => {
                    self.decoder.push_bytes(&buf[..n]);
                    self.decoder.push_descriptors(descriptors);
                    self.drain()
                }
                Err(e) => Err(TransportError::from(e)),
            };

            if let Err(e) = outcome {
                debug!(error = %e, "Link reader stopping");
                self.metrics.record_error(e.category());
                self.sink.post(LinkEvent::Error(e));
                return;
            }
        }
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(message) = self.decoder.next_message()? {
            self.metrics
                .record_receive(message.payload().len(), message.descriptor_count());

            let is_hello = message.is_control() && message.msg_type() == HELLO_MESSAGE_TYPE;
            let event = match (self.peer, is_hello) {
                (None, true) => {
                    let pid = parse_hello(&message)?;
                    self.peer = Some(pid);
                    LinkEvent::Connected {
                        announced: pid,
                        credentials: self.credentials,
                    }
                }
                (None, false) => {
                    return Err(TransportError::protocol("Message arrived before HELLO"));
                }
                (Some(_), true) => return Err(TransportError::protocol("Duplicate HELLO")),
                (Some(_), false) => LinkEvent::Message(message),
            };

            if !self.sink.post(event) {
                return Err(TransportError::closed("deliver"));
            }
        }
        Ok(())
    }
}

/// Kernel-reported pid of the process at the other end of `stream`
///
/// For a socket pair this is whoever created the pair, not whoever holds
/// the other end now.
fn peer_credentials(stream: &UnixStream) -> Option<ProcessId> {
    match getsockopt(stream, sockopt::PeerCredentials) {
        Ok(creds) => u32::try_from(creds.pid())
            .ok()
            .filter(|&pid| pid != 0)
            .map(ProcessId::from_raw),
        Err(e) => {
            debug!(error = %e, "Peer credentials unavailable");
            None
        }
    }
}

fn parse_hello(message: &Message) -> Result<ProcessId> {
    let payload: [u8; 4] = message.payload()[..]
        .try_into()
        .map_err(|_| TransportError::protocol("Malformed HELLO payload"))?;
    Ok(ProcessId::from_raw(u32::from_le_bytes(payload)))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_flags() -> MsgFlags {
    MsgFlags::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_flags() -> MsgFlags {
    MsgFlags::empty()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}

async fn write_frame(stream: &UnixStream, frame: EncodedFrame) -> io::Result<()> {
    let fd = stream.as_raw_fd();
    let raw: Vec<RawFd> = frame.descriptors.iter().map(AsRawFd::as_raw_fd).collect();
    let mut offset = 0;

    while offset < frame.bytes.len() {
        let with_descriptors = offset == 0 && !raw.is_empty();
        let written = stream
            .async_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(&frame.bytes[offset..])];
                let rights = [ControlMessage::ScmRights(&raw[..])];
                let cmsgs: &[ControlMessage] = if with_descriptors { &rights } else { &[] };
                sendmsg::<()>(fd, &iov, cmsgs, send_flags(), None).map_err(io::Error::from)
            })
            .await?;
        if written == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }
        offset += written;
    }

    // The kernel holds its own references now; ours close on drop
    drop(frame.descriptors);
    Ok(())
}

async fn read_chunk(
    stream: &UnixStream,
    buf: &mut [u8],
    cmsg: &mut Vec<u8>,
) -> io::Result<(usize, Vec<OwnedFd>)> {
    let fd = stream.as_raw_fd();
    stream
        .async_io(Interest::READABLE, || {
            let mut iov = [IoSliceMut::new(&mut *buf)];
            let msg = recvmsg::<()>(fd, &mut iov, Some(&mut *cmsg), recv_flags())
                .map_err(io::Error::from)?;

            let mut descriptors = Vec::new();
            for control in msg.cmsgs().map_err(io::Error::from)? {
                if let ControlMessageOwned::ScmRights(fds) = control {
                    // SAFETY: SCM_RIGHTS installs fresh descriptors in this
                    // process; nothing else refers to them yet.
                    descriptors.extend(
                        fds.into_iter()
                            .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                    );
                }
            }
            Ok((msg.bytes, descriptors))
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RoutingId;
    use std::io::{Read, Write};
    use std::time::Duration;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx, None), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("link event channel closed")
    }

    fn spawn_pair(
        settings: &ChannelSettings,
    ) -> (
        (LinkHandle, mpsc::UnboundedReceiver<LinkEvent>),
        (LinkHandle, mpsc::UnboundedReceiver<LinkEvent>),
    ) {
        let (a, b) = StdUnixStream::pair().unwrap();
        let (sink_a, rx_a) = sink();
        let (sink_b, rx_b) = sink();
        let link_a = spawn_link(
            LinkSource::Stream(OwnedFd::from(a)),
            ProcessId::from_raw(100),
            settings,
            sink_a,
            LinkMetrics::new(),
        );
        let link_b = spawn_link(
            LinkSource::Stream(OwnedFd::from(b)),
            ProcessId::from_raw(200),
            settings,
            sink_b,
            LinkMetrics::new(),
        );
        ((link_a, rx_a), (link_b, rx_b))
    }

    #[tokio::test]
    async fn test_hello_then_messages_in_order() {
        let settings = ChannelSettings::default();
        let ((link_a, _rx_a), (_link_b, mut rx_b)) = spawn_pair(&settings);

        for i in 0..3u32 {
            link_a
                .queues()
                .try_send(Message::new(RoutingId::new(1), i, vec![i as u8]))
                .unwrap();
        }

        match next_event(&mut rx_b).await {
            LinkEvent::Connected { announced, .. } => {
                assert_eq!(announced, ProcessId::from_raw(100))
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        for i in 0..3u32 {
            match next_event(&mut rx_b).await {
                LinkEvent::Message(msg) => assert_eq!(msg.msg_type(), i),
                other => panic!("expected Message, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_descriptor_crosses_link() {
        let settings = ChannelSettings::default();
        let ((link_a, _rx_a), (_link_b, mut rx_b)) = spawn_pair(&settings);

        let (mut ours, theirs) = StdUnixStream::pair().unwrap();
        let mut msg = Message::new(RoutingId::new(1), 9, Bytes::new());
        msg.attach_descriptor(OwnedFd::from(theirs));
        link_a.queues().try_send(msg).unwrap();

        assert!(matches!(next_event(&mut rx_b).await, LinkEvent::Connected { .. }));
        let received = match next_event(&mut rx_b).await {
            LinkEvent::Message(msg) => msg,
            other => panic!("expected Message, got {:?}", other),
        };
        let (_, _, _, _, mut fds) = received.into_parts();
        assert_eq!(fds.len(), 1);

        let mut passed = StdUnixStream::from(fds.remove(0));
        ours.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        passed.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_peer_drop_reports_error() {
        let settings = ChannelSettings::default();
        let ((link_a, mut rx_a), (link_b, _rx_b)) = spawn_pair(&settings);
        assert!(matches!(next_event(&mut rx_a).await, LinkEvent::Connected { .. }));

        drop(link_b);
        assert!(matches!(next_event(&mut rx_a).await, LinkEvent::Error(_)));
        drop(link_a);
    }

    #[tokio::test]
    async fn test_reserve_respects_capacity() {
        let settings = ChannelSettings {
            urgent_queue_capacity: 1,
            ..Default::default()
        };
        let (sink, _rx) = sink();
        let (a, _b) = StdUnixStream::pair().unwrap();
        let link = spawn_link(
            LinkSource::Stream(OwnedFd::from(a)),
            ProcessId::from_raw(1),
            &settings,
            sink,
            LinkMetrics::new(),
        );

        let permit = link.queues().try_reserve(Priority::Urgent).unwrap();
        assert!(matches!(
            link.queues().try_reserve(Priority::Urgent),
            Err(TransportError::ResourceExhausted { .. })
        ));
        // Normal traffic has its own queue
        assert!(link.queues().try_reserve(Priority::Normal).is_ok());
        drop(permit);
        assert!(link.queues().try_reserve(Priority::Urgent).is_ok());
    }

    #[tokio::test]
    async fn test_named_socket_accepts_one_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.sock");
        let settings = ChannelSettings::default();

        let listener = bind_named(&path).unwrap();
        let (server_sink, mut server_rx) = sink();
        let _server = spawn_link(
            LinkSource::Listener(listener),
            ProcessId::from_raw(1),
            &settings,
            server_sink,
            LinkMetrics::new(),
        );

        let fd = connect_named(&path).unwrap();
        let (client_sink, _client_rx) = sink();
        let _client = spawn_link(
            LinkSource::Stream(fd),
            ProcessId::from_raw(2),
            &settings,
            client_sink,
            LinkMetrics::new(),
        );

        // The client claims pid 2, the kernel knows better
        match next_event(&mut server_rx).await {
            LinkEvent::Connected {
                announced,
                credentials,
            } => {
                assert_eq!(announced, ProcessId::from_raw(2));
                assert_eq!(credentials, Some(ProcessId::current()));
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unaccepted_named_socket_removed_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idle.sock");
        let (sink, _rx) = sink();
        let link = spawn_link(
            LinkSource::Listener(bind_named(&path).unwrap()),
            ProcessId::from_raw(1),
            &ChannelSettings::default(),
            sink,
            LinkMetrics::new(),
        );
        assert!(path.exists());

        drop(link);
        tokio::time::timeout(Duration::from_secs(5), async {
            while path.exists() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("socket file outlived its link");
    }

    #[tokio::test]
    async fn test_named_listener_drop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bound.sock");
        let listener = bind_named(&path).unwrap();
        assert_eq!(listener.path(), path.as_path());
        assert!(path.exists());

        drop(listener);
        assert!(!path.exists());
    }

    #[test]
    fn test_connect_named_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = connect_named(&dir.path().join("absent.sock")).unwrap_err();
        assert_eq!(err.category(), "connection");
    }
}
