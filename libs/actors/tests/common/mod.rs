//! Shared fixtures for actor integration tests
//!
//! Each "process" is an `ActorRuntime` with its own logical pid, all living
//! on the test's current-thread runtime and talking over real socket pairs.

#![allow(dead_code)]

use bytes::Bytes;
use ipc_actors::{
    ActorContext, ActorRuntime, CloneContext, CloneUnsupported, FailureReporter, ProcessControl,
    ProcessHandle, ProtocolFactory, ProtocolTable, ProtocolViolation, Side, TeardownReason,
    ToplevelProtocol,
};
use ipc_network::{
    Message, ProcessId, ProtocolId, Result as TransportResult, RoutingId, SocketPairFactory,
    TransportDescriptor, TransportFactory,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BASE: ProtocolId = ProtocolId::new(1);
pub const BRIDGED_PARENT: ProtocolId = ProtocolId::new(2);
pub const BRIDGED_CHILD: ProtocolId = ProtocolId::new(3);
pub const SECOND_PARENT: ProtocolId = ProtocolId::new(4);
pub const SECOND_CHILD: ProtocolId = ProtocolId::new(5);

/// Message type that handlers treat as a protocol violation
pub const FORBIDDEN: u32 = 666;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything every actor of one process saw, by protocol
#[derive(Debug, Default)]
pub struct Journal {
    pub created: Vec<(ProtocolId, ProcessId)>,
    pub messages: HashMap<ProtocolId, Vec<u32>>,
    pub teardowns: Vec<(ProtocolId, TeardownReason)>,
}

pub type SharedJournal = Arc<Mutex<Journal>>;

struct Recording {
    protocol: ProtocolId,
    journal: SharedJournal,
}

impl ToplevelProtocol for Recording {
    fn on_message_received(
        &mut self,
        _cx: &mut ActorContext<'_>,
        message: Message,
    ) -> Result<(), ProtocolViolation> {
        if message.msg_type() == FORBIDDEN {
            return Err(ProtocolViolation::new("forbidden message type"));
        }
        self.journal
            .lock()
            .messages
            .entry(self.protocol)
            .or_default()
            .push(message.msg_type());
        Ok(())
    }

    fn on_teardown(&mut self, reason: TeardownReason) {
        self.journal.lock().teardowns.push((self.protocol, reason));
    }

    fn clone_toplevel(
        &self,
        cx: &CloneContext,
    ) -> Result<Box<dyn ToplevelProtocol>, CloneUnsupported> {
        self.journal.lock().created.push((self.protocol, cx.peer_pid));
        Ok(Box::new(Recording {
            protocol: self.protocol,
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct RecordingFactory {
    name: &'static str,
    protocol: ProtocolId,
    side: Side,
    journal: SharedJournal,
}

impl ProtocolFactory for RecordingFactory {
    fn name(&self) -> &str {
        self.name
    }

    fn side(&self) -> Side {
        self.side
    }

    fn create(&self, peer_pid: ProcessId) -> Box<dyn ToplevelProtocol> {
        self.journal.lock().created.push((self.protocol, peer_pid));
        Box::new(Recording {
            protocol: self.protocol,
            journal: Arc::clone(&self.journal),
        })
    }
}

/// Protocol table shared by every test process
pub fn protocol_table(base_side: Side, journal: &SharedJournal) -> ProtocolTable {
    let mut table = ProtocolTable::new();
    for (name, protocol, side) in [
        ("PBase", BASE, base_side),
        ("PBridgedParent", BRIDGED_PARENT, Side::Parent),
        ("PBridgedChild", BRIDGED_CHILD, Side::Child),
        ("PSecondParent", SECOND_PARENT, Side::Parent),
        ("PSecondChild", SECOND_CHILD, Side::Child),
    ] {
        table.register(
            protocol,
            Arc::new(RecordingFactory {
                name,
                protocol,
                side,
                journal: Arc::clone(journal),
            }),
        );
    }
    table
}

/// Kill/abort boundary that only counts
#[derive(Debug, Default)]
pub struct MockControl {
    pub killed: Mutex<Vec<ProcessId>>,
    pub aborts: AtomicUsize,
}

impl ProcessControl for MockControl {
    fn open_process_handle(&self, pid: ProcessId) -> io::Result<ProcessHandle> {
        Ok(ProcessHandle::new(pid))
    }

    fn kill_process(&self, handle: ProcessHandle) -> io::Result<()> {
        self.killed.lock().push(handle.pid());
        Ok(())
    }

    fn abort(&self, _reason: &str) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Socket-pair factory with call counters and a failure switch
#[derive(Debug, Default)]
pub struct CountingFactory {
    pub inner: SocketPairFactory,
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail: AtomicBool,
}

impl TransportFactory for CountingFactory {
    fn create_transport(
        &self,
        target: ProcessId,
    ) -> TransportResult<(TransportDescriptor, TransportDescriptor)> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ipc_network::TransportError::resource_exhausted(
                "descriptors",
                "test factory refused",
            ));
        }
        self.inner.create_transport(target)
    }

    fn close_descriptor(&self, descriptor: TransportDescriptor) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close_descriptor(descriptor);
    }
}

/// One test process
pub struct Process {
    pub runtime: ActorRuntime,
    pub journal: SharedJournal,
    pub control: Arc<MockControl>,
    pub factory: Arc<CountingFactory>,
}

impl Process {
    pub fn new(pid: u32, base_side: Side) -> Self {
        let journal = SharedJournal::default();
        let control = Arc::new(MockControl::default());
        let factory = Arc::new(CountingFactory::default());
        let runtime = ActorRuntime::new(
            ProcessId::from_raw(pid),
            protocol_table(base_side, &journal),
            factory.clone(),
            FailureReporter::new(control.clone()),
        );
        Self {
            runtime,
            journal,
            control,
            factory,
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.runtime.local_pid()
    }

    pub fn messages(&self, protocol: ProtocolId) -> Vec<u32> {
        messages(&self.journal, protocol)
    }
}

pub fn messages(journal: &SharedJournal, protocol: ProtocolId) -> Vec<u32> {
    journal
        .lock()
        .messages
        .get(&protocol)
        .cloned()
        .unwrap_or_default()
}

/// How many actors of `protocol` this process has instantiated
pub fn created(journal: &SharedJournal, protocol: ProtocolId) -> usize {
    journal
        .lock()
        .created
        .iter()
        .filter(|(id, _)| *id == protocol)
        .count()
}

/// Connect two processes with a base channel; returns each side's actor
pub fn connect(
    left: &mut Process,
    right: &mut Process,
) -> (ipc_actors::ActorKey, ipc_actors::ActorKey) {
    let (l, r) = SocketPairFactory::new()
        .create_transport(right.pid())
        .unwrap();
    let left_key = left.runtime.adopt_channel(l, BASE, right.pid()).unwrap();
    let right_key = right.runtime.adopt_channel(r, BASE, left.pid()).unwrap();
    (left_key, right_key)
}

/// Dispatch every process until `done` holds
pub async fn pump(processes: &mut [&mut Process], mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            for process in processes.iter_mut() {
                process.runtime.dispatch_pending().unwrap();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out pumping processes");
}

/// Keep dispatching for a while without a stop condition
pub async fn settle(processes: &mut [&mut Process]) {
    for _ in 0..20 {
        for process in processes.iter_mut() {
            process.runtime.dispatch_pending().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn app_message(msg_type: u32) -> Message {
    Message::new(RoutingId::new(1), msg_type, Bytes::new())
}
