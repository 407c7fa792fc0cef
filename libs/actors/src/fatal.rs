//! Failure Reporter
//!
//! The one place a detected protocol violation turns into an action. The
//! decision itself is a pure function of which side we are and who the
//! peer is; the OS calls it leads to go through `ProcessControl` so tests
//! can observe them without killing anything.

use ipc_network::ProcessId;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a fatal protocol error resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalAction {
    /// Parent side: terminate the misbehaving peer
    KillPeer(ProcessId),
    /// Child side: terminate ourselves
    Abort,
    /// Parent side with nothing meaningful to kill
    LogOnly,
}

/// Decide how to respond to a fatal error
///
/// A child never kills its parent. A parent never targets a sentinel pid or
/// itself.
pub fn decide_fatal_action(is_local_side_parent: bool, peer_pid: ProcessId) -> FatalAction {
    if !is_local_side_parent {
        return FatalAction::Abort;
    }
    if !peer_pid.is_valid() || peer_pid.is_current_process() {
        return FatalAction::LogOnly;
    }
    FatalAction::KillPeer(peer_pid)
}

/// Opened handle on a peer process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: ProcessId,
}

impl ProcessHandle {
    pub fn new(pid: ProcessId) -> Self {
        Self { pid }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }
}

/// OS boundary used by the reporter
pub trait ProcessControl: Send + Sync {
    fn open_process_handle(&self, pid: ProcessId) -> io::Result<ProcessHandle>;

    fn kill_process(&self, handle: ProcessHandle) -> io::Result<()>;

    /// Terminate the calling process. Real implementations do not return.
    fn abort(&self, reason: &str);
}

/// `ProcessControl` backed by POSIX signals
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessControl;

fn to_nix_pid(pid: ProcessId) -> io::Result<Pid> {
    let raw = i32::try_from(pid.as_raw())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("{} out of range", pid)))?;
    if raw <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} does not name a single process", pid),
        ));
    }
    Ok(Pid::from_raw(raw))
}

impl ProcessControl for OsProcessControl {
    fn open_process_handle(&self, pid: ProcessId) -> io::Result<ProcessHandle> {
        // Signal 0 probes for existence and permission
        kill(to_nix_pid(pid)?, None).map_err(io::Error::from)?;
        Ok(ProcessHandle::new(pid))
    }

    fn kill_process(&self, handle: ProcessHandle) -> io::Result<()> {
        kill(to_nix_pid(handle.pid)?, Signal::SIGKILL).map_err(io::Error::from)
    }

    fn abort(&self, reason: &str) {
        error!(reason, "Aborting process after fatal protocol error");
        std::process::abort();
    }
}

/// Converts protocol violations into kill/abort decisions
#[derive(Clone)]
pub struct FailureReporter {
    control: Arc<dyn ProcessControl>,
}

impl FailureReporter {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self { control }
    }

    /// Reporter that really kills and aborts
    pub fn os() -> Self {
        Self::new(Arc::new(OsProcessControl))
    }

    /// Log a protocol error. Never terminates anything.
    pub fn protocol_error(&self, message: &str) {
        error!("IPC protocol error: {}", message);
    }

    /// Handle a fatal protocol error and return the action taken
    ///
    /// Failing to open or kill the peer is only logged; a parent keeps
    /// running so it can still clean up its other children.
    pub fn fatal_error(
        &self,
        protocol_name: &str,
        message: &str,
        peer_pid: ProcessId,
        is_local_side_parent: bool,
    ) -> FatalAction {
        self.protocol_error(message);
        error!(
            protocol = protocol_name,
            %peer_pid,
            is_local_side_parent,
            "IPC FatalError"
        );

        let action = decide_fatal_action(is_local_side_parent, peer_pid);
        match action {
            FatalAction::KillPeer(pid) => match self.control.open_process_handle(pid) {
                Ok(handle) => match self.control.kill_process(handle) {
                    Ok(()) => info!(%pid, "Killed peer after protocol violation"),
                    Err(e) => warn!(%pid, error = %e, "Failed to kill peer process"),
                },
                Err(e) => warn!(%pid, error = %e, "Failed to open peer process handle"),
            },
            FatalAction::Abort => {
                self.control
                    .abort(&format!("{} protocol violation: {}", protocol_name, message));
            }
            FatalAction::LogOnly => {
                warn!(%peer_pid, "No peer to kill for fatal error");
            }
        }
        action
    }
}

impl std::fmt::Debug for FailureReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureReporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorded {
        opened: Vec<ProcessId>,
        killed: Vec<ProcessId>,
        aborts: Vec<String>,
    }

    #[derive(Default)]
    struct MockControl {
        calls: Mutex<Recorded>,
        fail_open: bool,
        fail_kill: bool,
    }

    impl ProcessControl for MockControl {
        fn open_process_handle(&self, pid: ProcessId) -> io::Result<ProcessHandle> {
            self.calls.lock().opened.push(pid);
            if self.fail_open {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            Ok(ProcessHandle::new(pid))
        }

        fn kill_process(&self, handle: ProcessHandle) -> io::Result<()> {
            self.calls.lock().killed.push(handle.pid());
            if self.fail_kill {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            Ok(())
        }

        fn abort(&self, reason: &str) {
            self.calls.lock().aborts.push(reason.to_string());
        }
    }

    #[test]
    fn test_decision_table() {
        let peer = ProcessId::from_raw(4242);
        assert_eq!(decide_fatal_action(true, peer), FatalAction::KillPeer(peer));
        assert_eq!(decide_fatal_action(false, peer), FatalAction::Abort);
        assert_eq!(decide_fatal_action(true, ProcessId::INVALID), FatalAction::LogOnly);
        assert_eq!(decide_fatal_action(true, ProcessId::CURRENT), FatalAction::LogOnly);
        assert_eq!(decide_fatal_action(true, ProcessId::current()), FatalAction::LogOnly);
        assert_eq!(decide_fatal_action(false, ProcessId::INVALID), FatalAction::Abort);
    }

    #[test]
    fn test_parent_kills_peer_once() {
        let control = Arc::new(MockControl::default());
        let reporter = FailureReporter::new(control.clone());
        let peer = ProcessId::from_raw(4242);

        let action = reporter.fatal_error("PContent", "bad message", peer, true);
        assert_eq!(action, FatalAction::KillPeer(peer));

        let calls = control.calls.lock();
        assert_eq!(calls.opened, vec![peer]);
        assert_eq!(calls.killed, vec![peer]);
        assert!(calls.aborts.is_empty());
    }

    #[test]
    fn test_child_aborts_and_never_kills() {
        let control = Arc::new(MockControl::default());
        let reporter = FailureReporter::new(control.clone());

        let action = reporter.fatal_error("PContent", "bad message", ProcessId::from_raw(1), false);
        assert_eq!(action, FatalAction::Abort);

        let calls = control.calls.lock();
        assert!(calls.opened.is_empty());
        assert!(calls.killed.is_empty());
        assert_eq!(calls.aborts.len(), 1);
        assert!(calls.aborts[0].contains("PContent"));
    }

    #[test]
    fn test_sentinel_peer_skips_kill() {
        let control = Arc::new(MockControl::default());
        let reporter = FailureReporter::new(control.clone());

        reporter.fatal_error("PContent", "bad", ProcessId::INVALID, true);
        reporter.fatal_error("PContent", "bad", ProcessId::CURRENT, true);

        let calls = control.calls.lock();
        assert!(calls.opened.is_empty());
        assert!(calls.killed.is_empty());
        assert!(calls.aborts.is_empty());
    }

    #[test]
    fn test_kill_failures_are_only_logged() {
        let control = Arc::new(MockControl {
            fail_open: true,
            ..MockControl::default()
        });
        let reporter = FailureReporter::new(control.clone());
        let peer = ProcessId::from_raw(77);
        assert_eq!(
            reporter.fatal_error("PGpu", "bad", peer, true),
            FatalAction::KillPeer(peer)
        );
        assert!(control.calls.lock().killed.is_empty());

        let control = Arc::new(MockControl {
            fail_kill: true,
            ..MockControl::default()
        });
        let reporter = FailureReporter::new(control.clone());
        reporter.fatal_error("PGpu", "bad", peer, true);
        assert_eq!(control.calls.lock().killed, vec![peer]);
        assert!(control.calls.lock().aborts.is_empty());
    }

    #[test]
    fn test_protocol_error_terminates_nothing() {
        let control = Arc::new(MockControl::default());
        FailureReporter::new(control.clone()).protocol_error("unexpected reply");
        let calls = control.calls.lock();
        assert!(calls.opened.is_empty() && calls.aborts.is_empty());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fatal_error_reports_protocol_error() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let control = Arc::new(MockControl::default());
        tracing::subscriber::with_default(subscriber, || {
            FailureReporter::new(control.clone()).fatal_error(
                "PContent",
                "bad message",
                ProcessId::from_raw(4242),
                true,
            );
        });

        let log = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert_eq!(log.matches("IPC protocol error: bad message").count(), 1);
        assert_eq!(log.matches("IPC FatalError").count(), 1);
        assert_eq!(control.calls.lock().killed, vec![ProcessId::from_raw(4242)]);
    }

    #[test]
    fn test_os_control_rejects_group_pids() {
        let control = OsProcessControl;
        assert!(control.open_process_handle(ProcessId::INVALID).is_err());
        assert!(control.open_process_handle(ProcessId::CURRENT).is_err());
    }

    #[test]
    fn test_os_control_probes_live_process() {
        let handle = OsProcessControl
            .open_process_handle(ProcessId::current())
            .unwrap();
        assert_eq!(handle.pid(), ProcessId::current());
    }
}
