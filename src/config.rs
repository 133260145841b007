use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::error::RconError;

pub const DEFAULT_PORT: u16 = 2302;

/// Client settings, usually read from a TOML file. Every field is optional.
///
/// ```toml
/// keepalive_interval_ms = 5000
/// default_port = 2302
/// recv_buffer_size = 65535
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub keepalive_interval_ms: u64,
    pub default_port: u16,
    /// Largest datagram that can be received; longer ones are truncated and
    /// then fail the checksum.
    pub recv_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            keepalive_interval_ms: 5000,
            default_port: DEFAULT_PORT,
            recv_buffer_size: 65535,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, RconError> {
        let config: ClientConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RconError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn validate(&self) -> Result<(), RconError> {
        if self.keepalive_interval_ms == 0 {
            return Err(RconError::InvalidConfig(
                "keepalive_interval_ms must be positive".to_string(),
            ));
        }
        if self.recv_buffer_size < crate::packet::HEADER_SIZE {
            return Err(RconError::InvalidConfig(format!(
                "recv_buffer_size must be at least {} bytes",
                crate::packet::HEADER_SIZE
            )));
        }
        Ok(())
    }
}
