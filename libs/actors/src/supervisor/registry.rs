//! Supervisor Registry
//!
//! Process-wide list of live supervisors, owned explicitly rather than held
//! in a static. Create one with `init` at process start, hand clones to
//! every supervisor, and `teardown` it at shutdown. Tests build as many
//! independent registries as they like.
//!
//! Lock is held only to copy entries in or out; sends happen outside it.

use super::ProcessKind;
use ipc_network::{ChannelId, ChannelSender, Message, ProcessId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry-assigned supervisor id, unique for the registry's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SupervisorId(u64);

impl SupervisorId {
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Snapshot of one registered supervisor
#[derive(Debug, Clone)]
pub struct SupervisorInfo {
    pub id: SupervisorId,
    pub kind: ProcessKind,
    pub pid: Option<ProcessId>,
    pub channel_id: Option<ChannelId>,
}

#[derive(Debug)]
struct Entry {
    info: SupervisorInfo,
    sender: Option<ChannelSender>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: BTreeMap<SupervisorId, Entry>,
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SupervisorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the lifetime of this process
    pub fn init() -> Self {
        debug!("Supervisor registry initialized");
        Self::new()
    }

    /// Forget every entry. Returns how many supervisors were still alive.
    pub fn teardown(&self) -> usize {
        let mut inner = self.inner.lock();
        let remaining = inner.entries.len();
        if remaining > 0 {
            warn!(remaining, "Supervisor registry torn down with live supervisors");
        }
        inner.entries.clear();
        remaining
    }

    /// Add a supervisor; it stays listed until the registration drops
    pub fn register(&self, kind: ProcessKind) -> Registration {
        let mut inner = self.inner.lock();
        let id = SupervisorId(inner.next_id);
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                info: SupervisorInfo {
                    id,
                    kind,
                    pid: None,
                    channel_id: None,
                },
                sender: None,
            },
        );
        Registration {
            registry: self.clone(),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Number of live supervisors of `kind`
    pub fn count(&self, kind: ProcessKind) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.info.kind == kind)
            .count()
    }

    /// Registration-ordered snapshot, optionally filtered by kind
    pub fn iter(&self, kind: Option<ProcessKind>) -> Vec<SupervisorInfo> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| kind.map_or(true, |kind| entry.info.kind == kind))
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Send a message built per supervisor to every match with a channel
    ///
    /// Returns how many sends were accepted.
    pub fn broadcast<F>(&self, kind: Option<ProcessKind>, mut make_message: F) -> usize
    where
        F: FnMut(&SupervisorInfo) -> Message,
    {
        let targets: Vec<(SupervisorInfo, ChannelSender)> = self
            .inner
            .lock()
            .entries
            .values()
            .filter(|entry| kind.map_or(true, |kind| entry.info.kind == kind))
            .filter_map(|entry| Some((entry.info.clone(), entry.sender.clone()?)))
            .collect();

        let delivered = targets
            .iter()
            .filter(|(info, sender)| sender.send(make_message(info)))
            .count();
        debug!(?kind, targets = targets.len(), delivered, "Broadcast to supervisors");
        delivered
    }

    fn update(&self, id: SupervisorId, apply: impl FnOnce(&mut Entry)) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&id) {
            apply(entry);
        }
    }
}

/// A supervisor's place in the registry; removes it on drop
#[derive(Debug)]
pub struct Registration {
    registry: SupervisorRegistry,
    id: SupervisorId,
}

impl Registration {
    pub fn id(&self) -> SupervisorId {
        self.id
    }

    pub fn update_channel(&self, channel_id: Option<ChannelId>, sender: Option<ChannelSender>) {
        self.registry.update(self.id, |entry| {
            entry.info.channel_id = channel_id;
            entry.sender = sender;
        });
    }

    pub fn update_pid(&self, pid: Option<ProcessId>) {
        self.registry.update(self.id, |entry| entry.info.pid = pid);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.inner.lock().entries.remove(&self.id);
    }
}
