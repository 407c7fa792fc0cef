//! Default values for the channel layer and the actor runtime.

/// Channel defaults
pub mod channel {
    /// Outbound slots reserved for urgent (control-plane) messages
    pub const URGENT_QUEUE_CAPACITY: usize = 64;

    /// Outbound slots for normal-priority messages
    pub const NORMAL_QUEUE_CAPACITY: usize = 1024;

    /// Largest payload accepted on the wire
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

    /// Descriptors a single message may carry
    pub const MAX_DESCRIPTORS_PER_MESSAGE: usize = 7;

    /// Bytes requested from the socket per read
    pub const READ_BUFFER_SIZE: usize = 64 * 1024;

    /// Upper bound imposed by `SCM_RIGHTS`
    pub const DESCRIPTOR_LIMIT: usize = 253;
}

/// Process-wide defaults
pub mod global {
    /// Directory holding named channel sockets
    pub const SOCKET_DIR: &str = "/tmp/ipc";

    /// Fallback filter when `RUST_LOG` is unset
    pub const LOG_LEVEL: &str = "info";

    /// Environment variable prefix for overrides (`IPC__CHANNEL__...`)
    pub const ENV_PREFIX: &str = "IPC";
}
