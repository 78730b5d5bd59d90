//! Runtime configuration.
//!
//! ```toml
//! ask_timeout_ms = 5000
//! new_transaction_timeout_ms = 5000
//! mailbox_size = 32
//! link_buffer = 64
//! ```
//!
//! Every key is optional; missing keys take the [`Default`] values.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timeouts and buffer sizes for one member.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Deadline for every proxied operation after the transaction is open.
    pub ask_timeout_ms: u64,
    /// Deadline for obtaining a transaction id from the master.
    pub new_transaction_timeout_ms: u64,
    /// Capacity of the master actor's mailbox.
    pub mailbox_size: usize,
    /// Frames buffered per direction on a member-to-member link.
    pub link_buffer: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ask_timeout_ms: 5_000,
            new_transaction_timeout_ms: 5_000,
            mailbox_size: 32,
            link_buffer: 64,
        }
    }
}

impl ProxyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ask_timeout_ms == 0 || self.new_transaction_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.mailbox_size == 0 || self.link_buffer == 0 {
            return Err(ConfigError::Invalid("buffer sizes must be positive".into()));
        }
        Ok(())
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }

    pub fn new_transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.new_transaction_timeout_ms)
    }

    /// Same buffers, both timeouts set to `timeout`. Handy in tests.
    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_millis().max(1) as u64;
        self.ask_timeout_ms = millis;
        self.new_transaction_timeout_ms = millis;
        self
    }
}
