//! Runtime configuration
//!
//! Sizing defaults for collections and synchronization objects. A process
//! installs one [`Config`] at startup; constructors that take no explicit
//! sizing read it through [`get`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static INSTALLED: OnceLock<Config> = OnceLock::new();

/// Configuration for object and collection construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Initial slot count of a queue's circular buffer
    pub queue_capacity: usize,
    /// Multiplier applied to a full queue or stack
    pub queue_growth_factor: usize,
    /// Initial slot count of a stack
    pub stack_capacity: usize,
    /// Acquisition attempts a mutex spins through before blocking
    pub mutex_spin_count: u32,
    /// Stack size for threads created with a stack size of zero.
    /// Zero leaves the choice to the native runtime.
    pub default_stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            queue_growth_factor: 2,
            stack_capacity: 32,
            mutex_spin_count: 0,
            default_stack_size: 0,
        }
    }
}

impl Config {
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n.max(1);
        self
    }

    pub fn queue_growth_factor(mut self, n: usize) -> Self {
        self.queue_growth_factor = n.max(2);
        self
    }

    pub fn stack_capacity(mut self, n: usize) -> Self {
        self.stack_capacity = n.max(1);
        self
    }

    pub fn mutex_spin_count(mut self, n: u32) -> Self {
        self.mutex_spin_count = n;
        self
    }

    pub fn default_stack_size(mut self, n: usize) -> Self {
        self.default_stack_size = n;
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).map_err(|e| {
            tracing::warn!(error = %e, "rejecting malformed configuration");
            Error::InvalidParameter("malformed configuration")
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 || self.stack_capacity == 0 {
            return Err(Error::InvalidParameter("collection capacity must be non-zero"));
        }
        if self.queue_growth_factor < 2 {
            return Err(Error::InvalidParameter("growth factor must be at least 2"));
        }
        Ok(())
    }
}

/// Install the process-wide configuration. Only the first install wins.
pub fn install(config: Config) -> Result<()> {
    config.validate()?;
    INSTALLED
        .set(config)
        .map_err(|_| Error::InvalidParameter("configuration already installed"))
}

/// The installed configuration, or the defaults if none was installed
pub fn get() -> &'static Config {
    INSTALLED.get_or_init(Config::default)
}
