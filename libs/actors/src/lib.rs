//! Top-Level Actors Across Processes
//!
//! Bootstraps and grows a forest of top-level actors, each owning one
//! `Channel` to a peer process.
//!
//! # Architecture
//!
//! ```text
//!   parent process                 mediator                 child process
//! ┌───────────────┐   channel   ┌────────────┐   channel   ┌───────────────┐
//! │ ActorRuntime  │◄───────────►│ ActorRuntime│◄──────────►│ ActorRuntime  │
//! │   actor P     │             │  actor A  B │            │   actor C     │
//! └──────▲────────┘             └────┬───────┘             └──────▲────────┘
//!        │     ChannelOpened(urgent) │ bridge(A, B)               │
//!        └───────────────────────────┴────────────────────────────┘
//!                     new direct channel P ◄──► C
//! ```
//!
//! - `ProcessSupervisor` owns a spawned child and its primary channel
//! - `ToplevelRegistry` records which actor opened which
//! - `bridge`/`open` mint transport pairs and hand them out all-or-nothing
//! - `FailureReporter` turns protocol violations into kill or abort
//!
//! Everything that touches actors runs on the runtime's owning thread
//! unless a protocol opts out.

pub mod bridge;
pub mod error;
pub mod fatal;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod supervisor;
pub mod toplevel;

// Re-export commonly used types
pub use bridge::{bridge, open};
pub use error::{ActorError, ProtocolViolation, Result};
pub use fatal::{
    decide_fatal_action, FailureReporter, FatalAction, OsProcessControl, ProcessControl,
    ProcessHandle,
};
pub use protocol::{
    ActorContext, CloneContext, CloneUnsupported, ProtocolFactory, ProtocolTable, Side,
    TeardownReason, ToplevelProtocol,
};
pub use registry::{ActorKey, OpenedActors, ToplevelRegistry};
pub use runtime::{ActorRuntime, RuntimeMetrics};
pub use supervisor::{
    ExitInfo, ProcessKind, ProcessSupervisor, Registration, SupervisorHook, SupervisorId,
    SupervisorInfo, SupervisorListener, SupervisorRegistry,
};
pub use toplevel::{ActorHook, FdMappings, TopLevelActor};
