//! Top-Level Actor Registry
//!
//! Arena of top-level actors addressed by generational `ActorKey`s. Every
//! actor keeps an insertion-ordered list of the actors it opened, threaded
//! through the arena as sibling links, so insertion and removal are O(1)
//! and a stale key can never reach a reused slot.
//!
//! The registry holds no lock. It is mutated through `&mut self` on the
//! owning thread only.

use crate::error::{ActorError, Result};
use crate::protocol::{CloneContext, TeardownReason};
use crate::toplevel::{FdMappings, TopLevelActor};
use std::fmt;
use tracing::{debug, warn};

/// Stable handle to a registered actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorKey {
    index: u32,
    generation: u32,
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Entry {
    actor: TopLevelActor,
    opener: Option<ActorKey>,
    prev: Option<ActorKey>,
    next: Option<ActorKey>,
    first_opened: Option<ActorKey>,
    last_opened: Option<ActorKey>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
pub struct ToplevelRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ToplevelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register an actor with no opener
    pub fn insert(&mut self, actor: TopLevelActor) -> ActorKey {
        let entry = Entry {
            actor,
            opener: None,
            prev: None,
            next: None,
            first_opened: None,
            last_opened: None,
        };
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return ActorKey {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        ActorKey {
            index,
            generation: 0,
        }
    }

    fn entry(&self, key: ActorKey) -> Option<&Entry> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, key: ActorKey) -> Option<&mut Entry> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn entry_or_err(&mut self, key: ActorKey) -> Result<&mut Entry> {
        self.entry_mut(key).ok_or(ActorError::UnknownActor(key))
    }

    pub fn contains(&self, key: ActorKey) -> bool {
        self.entry(key).is_some()
    }

    pub fn get(&self, key: ActorKey) -> Option<&TopLevelActor> {
        self.entry(key).map(|entry| &entry.actor)
    }

    pub fn get_mut(&mut self, key: ActorKey) -> Option<&mut TopLevelActor> {
        self.entry_mut(key).map(|entry| &mut entry.actor)
    }

    /// Keys of every registered actor, in slot order
    pub fn keys(&self) -> Vec<ActorKey> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| ActorKey {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    /// The actor that opened `key`, if any
    pub fn opener_of(&self, key: ActorKey) -> Option<ActorKey> {
        self.entry(key).and_then(|entry| entry.opener)
    }

    /// Record `child` as opened by `opener`
    ///
    /// An actor is opened by at most one actor, once. Violations are caller
    /// bugs: they assert in debug builds and are refused in release builds.
    pub fn add_opened_actor(&mut self, opener: ActorKey, child: ActorKey) -> Result<()> {
        if !self.contains(opener) {
            return Err(ActorError::UnknownActor(opener));
        }
        let child_entry = self.entry_or_err(child)?;
        let already_opened = child_entry.opener.is_some() || opener == child;
        debug_assert!(!already_opened, "actor {} opened more than once", child);
        if already_opened {
            warn!(%opener, %child, "Refusing to register actor opened more than once");
            return Err(ActorError::AlreadyOpened(child));
        }

        let tail = self.entry_or_err(opener)?.last_opened;
        {
            let child_entry = self.entry_or_err(child)?;
            child_entry.opener = Some(opener);
            child_entry.prev = tail;
            child_entry.next = None;
        }
        if let Some(tail) = tail {
            self.entry_or_err(tail)?.next = Some(child);
        }
        let opener_entry = self.entry_or_err(opener)?;
        if opener_entry.first_opened.is_none() {
            opener_entry.first_opened = Some(child);
        }
        opener_entry.last_opened = Some(child);

        debug!(%opener, %child, "Opened actor registered");
        Ok(())
    }

    /// Detach `child` from its opener's list
    pub fn remove_opened_actor(&mut self, child: ActorKey) -> Result<()> {
        let (opener, prev, next) = {
            let entry = self.entry_or_err(child)?;
            (entry.opener.take(), entry.prev.take(), entry.next.take())
        };
        let Some(opener) = opener else {
            return Ok(());
        };

        match prev {
            Some(prev) => self.entry_or_err(prev)?.next = next,
            None => self.entry_or_err(opener)?.first_opened = next,
        }
        match next {
            Some(next) => self.entry_or_err(next)?.prev = prev,
            None => self.entry_or_err(opener)?.last_opened = prev,
        }
        Ok(())
    }

    pub fn first_opened_actor(&self, opener: ActorKey) -> Option<ActorKey> {
        self.entry(opener).and_then(|entry| entry.first_opened)
    }

    /// Lazy insertion-order traversal of the actors `opener` opened
    pub fn opened_actors(&self, opener: ActorKey) -> OpenedActors<'_> {
        OpenedActors {
            registry: self,
            next: self.first_opened_actor(opener),
        }
    }

    /// Destroy `key` and, first, every actor it still has open
    ///
    /// Each destroyed actor's handler sees exactly one teardown: children
    /// with `OpenerDestroyed`, `key` itself with `reason`. Returns how many
    /// actors were destroyed.
    pub fn destroy(&mut self, key: ActorKey, reason: TeardownReason) -> Result<usize> {
        if !self.contains(key) {
            return Err(ActorError::UnknownActor(key));
        }

        let mut destroyed = 0;
        while let Some(child) = self.first_opened_actor(key) {
            destroyed += self.destroy(child, TeardownReason::OpenerDestroyed)?;
        }

        self.remove_opened_actor(key)?;
        let slot = &mut self.slots[key.index as usize];
        if let Some(mut entry) = slot.entry.take() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(key.index);
            self.len -= 1;
            entry.actor.teardown(reason);
            destroyed += 1;
            debug!(actor = %key, ?reason, "Actor destroyed");
        }
        Ok(destroyed)
    }

    /// Clone every actor `template` opened and register the clones as
    /// opened by `target`
    ///
    /// Each clone takes the descriptor mapped to its protocol. A protocol
    /// that cannot clone, or a missing descriptor, fails the whole
    /// operation and destroys the clones made so far.
    pub fn clone_opened_toplevels(
        &mut self,
        template: ActorKey,
        target: ActorKey,
        fds: &mut FdMappings,
        cx: &CloneContext,
    ) -> Result<Vec<ActorKey>> {
        if !self.contains(template) {
            return Err(ActorError::UnknownActor(template));
        }
        if !self.contains(target) {
            return Err(ActorError::UnknownActor(target));
        }

        let sources: Vec<ActorKey> = self.opened_actors(template).collect();
        let mut clones = Vec::with_capacity(sources.len());
        for source in sources {
            match self.clone_one(source, target, fds, cx) {
                Ok(clone) => clones.push(clone),
                Err(e) => {
                    for clone in clones {
                        self.destroy(clone, TeardownReason::Requested)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(clones)
    }

    fn clone_one(
        &mut self,
        source: ActorKey,
        target: ActorKey,
        fds: &mut FdMappings,
        cx: &CloneContext,
    ) -> Result<ActorKey> {
        let actor = self.get(source).ok_or(ActorError::UnknownActor(source))?;
        let protocol = actor.protocol();
        let handler = actor
            .handler()
            .clone_toplevel(cx)
            .map_err(|_| ActorError::CloneNotImplemented { protocol })?;
        let descriptor = fds
            .take(protocol)
            .ok_or(ActorError::MissingDescriptor { protocol })?;

        let clone = TopLevelActor::new(protocol, cx.peer_pid, actor.side(), handler)
            .with_non_main_thread_use(actor.allows_non_main_thread_use())
            .with_pending_descriptor(descriptor);
        let key = self.insert(clone);
        self.add_opened_actor(target, key)?;
        Ok(key)
    }
}

/// Iterator over the actors one actor opened
pub struct OpenedActors<'a> {
    registry: &'a ToplevelRegistry,
    next: Option<ActorKey>,
}

impl Iterator for OpenedActors<'_> {
    type Item = ActorKey;

    fn next(&mut self) -> Option<ActorKey> {
        let current = self.next?;
        self.next = self.registry.entry(current).and_then(|entry| entry.next);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolViolation;
    use crate::protocol::{ActorContext, CloneUnsupported, Side, ToplevelProtocol};
    use ipc_network::{Message, ProcessId, ProtocolId, SocketPairFactory, TransportFactory};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<(u32, TeardownReason)>>>;

    struct Tagged {
        tag: u32,
        log: Log,
        cloneable: bool,
    }

    impl ToplevelProtocol for Tagged {
        fn on_message_received(
            &mut self,
            _cx: &mut ActorContext<'_>,
            _message: Message,
        ) -> std::result::Result<(), ProtocolViolation> {
            Ok(())
        }

        fn on_teardown(&mut self, reason: TeardownReason) {
            self.log.lock().push((self.tag, reason));
        }

        fn clone_toplevel(
            &self,
            _cx: &CloneContext,
        ) -> std::result::Result<Box<dyn ToplevelProtocol>, CloneUnsupported> {
            if !self.cloneable {
                return Err(CloneUnsupported);
            }
            Ok(Box::new(Tagged {
                tag: self.tag + 100,
                log: Arc::clone(&self.log),
                cloneable: true,
            }))
        }
    }

    fn actor(tag: u32, protocol: u32, log: &Log, cloneable: bool) -> TopLevelActor {
        TopLevelActor::new(
            ProtocolId::new(protocol),
            ProcessId::from_raw(tag + 1),
            Side::Parent,
            Box::new(Tagged {
                tag,
                log: Arc::clone(log),
                cloneable,
            }),
        )
    }

    #[test]
    fn test_opened_actors_in_insertion_order() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let root = registry.insert(actor(0, 1, &log, false));
        let children: Vec<_> = (1..=4)
            .map(|tag| {
                let key = registry.insert(actor(tag, 1, &log, false));
                registry.add_opened_actor(root, key).unwrap();
                key
            })
            .collect();

        assert_eq!(registry.opened_actors(root).collect::<Vec<_>>(), children);
        assert_eq!(registry.opener_of(children[2]), Some(root));

        registry.remove_opened_actor(children[1]).unwrap();
        registry.remove_opened_actor(children[3]).unwrap();
        assert_eq!(
            registry.opened_actors(root).collect::<Vec<_>>(),
            vec![children[0], children[2]]
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "opened more than once")]
    fn test_double_open_asserts_in_debug() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let root = registry.insert(actor(0, 1, &log, false));
        let child = registry.insert(actor(1, 1, &log, false));
        registry.add_opened_actor(root, child).unwrap();
        let _ = registry.add_opened_actor(root, child);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_double_open_refused_in_release() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let root = registry.insert(actor(0, 1, &log, false));
        let child = registry.insert(actor(1, 1, &log, false));
        registry.add_opened_actor(root, child).unwrap();
        assert!(matches!(
            registry.add_opened_actor(root, child),
            Err(ActorError::AlreadyOpened(_))
        ));
        assert_eq!(registry.opened_actors(root).count(), 1);
    }

    #[test]
    fn test_destroy_tears_down_each_child_once() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let root = registry.insert(actor(0, 1, &log, false));
        for tag in 1..=5 {
            let key = registry.insert(actor(tag, 1, &log, false));
            registry.add_opened_actor(root, key).unwrap();
        }

        assert_eq!(registry.destroy(root, TeardownReason::ChannelError).unwrap(), 6);
        assert!(registry.is_empty());

        let log = log.lock();
        let children: Vec<_> = log
            .iter()
            .filter(|(_, reason)| *reason == TeardownReason::OpenerDestroyed)
            .map(|(tag, _)| *tag)
            .collect();
        assert_eq!(children, vec![1, 2, 3, 4, 5]);
        assert_eq!(log.last(), Some(&(0, TeardownReason::ChannelError)));
    }

    #[test]
    fn test_destroy_is_recursive_and_unlinks_from_opener() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let root = registry.insert(actor(0, 1, &log, false));
        let mid = registry.insert(actor(1, 1, &log, false));
        let leaf = registry.insert(actor(2, 1, &log, false));
        registry.add_opened_actor(root, mid).unwrap();
        registry.add_opened_actor(mid, leaf).unwrap();

        assert_eq!(registry.destroy(mid, TeardownReason::Requested).unwrap(), 2);
        assert!(registry.contains(root));
        assert_eq!(registry.opened_actors(root).count(), 0);
        assert_eq!(
            &log.lock()[..],
            &[(2, TeardownReason::OpenerDestroyed), (1, TeardownReason::Requested)]
        );
    }

    #[test]
    fn test_stale_key_is_rejected_after_reuse() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let first = registry.insert(actor(0, 1, &log, false));
        registry.destroy(first, TeardownReason::Requested).unwrap();
        let second = registry.insert(actor(1, 1, &log, false));

        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
        assert!(matches!(
            registry.destroy(first, TeardownReason::Requested),
            Err(ActorError::UnknownActor(_))
        ));
        assert!(registry.contains(second));
    }

    #[test]
    fn test_clone_forest_registers_under_target() {
        let log = Log::default();
        let factory = SocketPairFactory::new();
        let mut registry = ToplevelRegistry::new();
        let template = registry.insert(actor(0, 1, &log, false));
        let target = registry.insert(actor(50, 1, &log, false));
        for (tag, protocol) in [(1, 7), (2, 8)] {
            let key = registry.insert(actor(tag, protocol, &log, true));
            registry.add_opened_actor(template, key).unwrap();
        }

        let mut fds = FdMappings::new();
        for protocol in [8, 7] {
            let (parent, child) = factory.create_transport(ProcessId::from_raw(9)).unwrap();
            fds.insert(ProtocolId::new(protocol), parent);
            factory.close_descriptor(child);
        }

        let cx = CloneContext {
            peer_pid: ProcessId::from_raw(99),
        };
        let clones = registry
            .clone_opened_toplevels(template, target, &mut fds, &cx)
            .unwrap();
        assert_eq!(clones.len(), 2);
        assert!(fds.is_empty());
        assert_eq!(registry.opened_actors(target).collect::<Vec<_>>(), clones);
        assert_eq!(registry.get(clones[0]).unwrap().protocol(), ProtocolId::new(7));
        assert_eq!(registry.get(clones[1]).unwrap().peer_pid(), ProcessId::from_raw(99));
        // Template forest untouched
        assert_eq!(registry.opened_actors(template).count(), 2);
    }

    #[test]
    fn test_clone_without_support_fails_loudly() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let template = registry.insert(actor(0, 1, &log, false));
        let target = registry.insert(actor(50, 1, &log, false));
        let cloneable = registry.insert(actor(1, 7, &log, true));
        let stubborn = registry.insert(actor(2, 8, &log, false));
        registry.add_opened_actor(template, cloneable).unwrap();
        registry.add_opened_actor(template, stubborn).unwrap();

        let factory = SocketPairFactory::new();
        let mut fds = FdMappings::new();
        for protocol in [7, 8] {
            let (parent, _child) = factory.create_transport(ProcessId::from_raw(9)).unwrap();
            fds.insert(ProtocolId::new(protocol), parent);
        }

        let cx = CloneContext {
            peer_pid: ProcessId::from_raw(99),
        };
        let result = registry.clone_opened_toplevels(template, target, &mut fds, &cx);
        assert!(matches!(
            result,
            Err(ActorError::CloneNotImplemented { protocol }) if protocol == ProtocolId::new(8)
        ));
        // The partial clone was rolled back
        assert_eq!(registry.opened_actors(target).count(), 0);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_clone_missing_descriptor() {
        let log = Log::default();
        let mut registry = ToplevelRegistry::new();
        let template = registry.insert(actor(0, 1, &log, false));
        let target = registry.insert(actor(50, 1, &log, false));
        let child = registry.insert(actor(1, 7, &log, true));
        registry.add_opened_actor(template, child).unwrap();

        let cx = CloneContext {
            peer_pid: ProcessId::from_raw(99),
        };
        let result = registry.clone_opened_toplevels(template, target, &mut FdMappings::new(), &cx);
        assert!(matches!(result, Err(ActorError::MissingDescriptor { .. })));
    }

    proptest::proptest! {
        #[test]
        fn prop_destroying_roots_tears_down_every_actor_once(
            parents in proptest::collection::vec(proptest::option::of(0usize..32), 1..32),
        ) {
            let log = Log::default();
            let mut registry = ToplevelRegistry::new();
            let mut keys = Vec::new();
            for (tag, parent) in parents.iter().enumerate() {
                let key = registry.insert(actor(tag as u32, 1, &log, false));
                // Only earlier actors can be openers, which keeps the graph a forest
                if let Some(opener) = parent.filter(|p| *p < keys.len()) {
                    registry.add_opened_actor(keys[opener], key).unwrap();
                }
                keys.push(key);
            }

            let roots: Vec<_> = keys
                .iter()
                .copied()
                .filter(|key| registry.opener_of(*key).is_none())
                .collect();
            let destroyed: usize = roots
                .into_iter()
                .map(|key| registry.destroy(key, TeardownReason::Requested).unwrap())
                .sum();

            proptest::prop_assert_eq!(destroyed, keys.len());
            proptest::prop_assert!(registry.is_empty());
            let mut tags: Vec<u32> = log.lock().iter().map(|(tag, _)| *tag).collect();
            tags.sort_unstable();
            proptest::prop_assert_eq!(tags, (0..keys.len() as u32).collect::<Vec<_>>());
        }
    }
}
