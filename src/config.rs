//! Runtime configuration for a [`crate::Dispatcher`]

use crate::service::ServiceId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What a second `invoke` on a session does while one is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the in-flight command to finish
    Block,
    /// Return `Busy` immediately
    FailFast,
}

/// Concurrent session cap per service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    pub global: usize,
    pub echo: usize,
    pub storage: usize,
    pub crypto: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            global: 1,
            echo: 8,
            storage: 8,
            crypto: 16,
        }
    }
}

impl SessionLimits {
    pub fn for_service(&self, service: ServiceId) -> usize {
        match service {
            ServiceId::Global => self.global,
            ServiceId::Echo => self.echo,
            ServiceId::Storage => self.storage,
            ServiceId::Crypto => self.crypto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    pub session_limits: SessionLimits,
    pub busy_policy: BusyPolicy,
    /// Objects one session may hold open at once
    pub max_objects_per_session: usize,
    /// Longest object name accepted (bytes)
    pub max_object_name_len: usize,
    /// Storage sessions must be opened with the identify login
    pub storage_requires_identify: bool,
    /// Start of the secure virtual window
    pub secure_window_base: u64,
    /// Size of the secure virtual window (bytes)
    pub secure_window_size: u64,
    /// Byte quota of the in-memory storage backend
    pub storage_capacity: usize,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            session_limits: SessionLimits::default(),
            busy_policy: BusyPolicy::Block,
            max_objects_per_session: 64,
            max_object_name_len: crate::object::MAX_OBJECT_NAME_LEN,
            storage_requires_identify: true,
            secure_window_base: 0x4000_0000,
            secure_window_size: 16 * 1024 * 1024,
            storage_capacity: 1024 * 1024,
        }
    }
}

impl TeeConfig {
    /// Read a JSON config; absent fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
