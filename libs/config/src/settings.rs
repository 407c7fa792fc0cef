//! IPC Settings Module
//!
//! Loads configuration for the channel layer and actor runtime from an
//! optional TOML file with `IPC__`-prefixed environment overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct IpcConfig {
    /// Process-wide settings
    pub global: GlobalConfig,

    /// Channel queue and framing limits
    pub channel: ChannelSettings,

    /// Actor runtime behaviour
    pub runtime: RuntimeSettings,
}

/// Process-wide settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    pub socket_dir: PathBuf,
    pub log_level: String,
}

/// Channel queue and framing limits
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelSettings {
    /// Outbound capacity for urgent messages
    pub urgent_queue_capacity: usize,
    /// Outbound capacity for normal and background messages
    pub normal_queue_capacity: usize,
    /// Largest accepted payload in bytes
    pub max_message_size: usize,
    /// Descriptors one message may carry
    pub max_descriptors_per_message: usize,
    /// Bytes requested per socket read
    pub read_buffer_size: usize,
}

/// Actor runtime behaviour
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Lifts the owning-thread requirement for every top-level protocol.
    /// Intended for test harnesses only.
    pub allow_non_main_thread_use: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(defaults::global::SOCKET_DIR),
            log_level: defaults::global::LOG_LEVEL.to_string(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            urgent_queue_capacity: defaults::channel::URGENT_QUEUE_CAPACITY,
            normal_queue_capacity: defaults::channel::NORMAL_QUEUE_CAPACITY,
            max_message_size: defaults::channel::MAX_MESSAGE_SIZE,
            max_descriptors_per_message: defaults::channel::MAX_DESCRIPTORS_PER_MESSAGE,
            read_buffer_size: defaults::channel::READ_BUFFER_SIZE,
        }
    }
}

impl ChannelSettings {
    /// Check limits that would make a channel unusable
    pub fn validate(&self) -> Result<()> {
        if self.urgent_queue_capacity == 0 || self.normal_queue_capacity == 0 {
            bail!("channel queue capacities must be non-zero");
        }
        if self.max_descriptors_per_message == 0
            || self.max_descriptors_per_message > defaults::channel::DESCRIPTOR_LIMIT
        {
            bail!(
                "max_descriptors_per_message must be within 1..={}, got {}",
                defaults::channel::DESCRIPTOR_LIMIT,
                self.max_descriptors_per_message
            );
        }
        if self.read_buffer_size == 0 {
            bail!("read_buffer_size must be non-zero");
        }
        if self.max_message_size > u32::MAX as usize {
            bail!("max_message_size must fit the 32-bit length prefix");
        }
        Ok(())
    }
}

impl IpcConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading overrides from `env` instead of the
    /// process environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading IPC config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (IPC__ prefix)
        builder = builder.add_source(
            Environment::with_prefix(defaults::global::ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "IPC configuration loaded");
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.channel.validate().context("invalid [channel] section")
    }
}
