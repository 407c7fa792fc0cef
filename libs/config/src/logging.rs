//! Logging bootstrap
//!
//! Installs a `tracing` subscriber with an `EnvFilter`. `RUST_LOG` wins over
//! the configured level.

use crate::settings::GlobalConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the process-wide subscriber. Returns `false` when one was
/// already installed.
pub fn init_logging(global: &GlobalConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(global.log_level.clone()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_ids(true))
        .try_init()
        .is_ok()
}
