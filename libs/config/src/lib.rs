//! # IPC Configuration
//!
//! Settings shared by the channel layer and the actor runtime, plus the
//! logging bootstrap used by processes embedding them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ipc_config::{init_logging, IpcConfig};
//!
//! let config = IpcConfig::load(None).expect("configuration");
//! init_logging(&config.global);
//! assert!(config.channel.urgent_queue_capacity > 0);
//! ```

pub mod defaults;
pub mod logging;
pub mod settings;

// Re-export commonly used types
pub use logging::init_logging;
pub use settings::{ChannelSettings, GlobalConfig, IpcConfig, RuntimeSettings};
