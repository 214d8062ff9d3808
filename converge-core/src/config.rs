//! Driver configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Per-call time limits for remote calls made during one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub get_timeout_secs: u64,
    pub submit_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub delete_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            get_timeout_secs: 30,
            submit_timeout_secs: 60,
            poll_timeout_secs: 15,
            delete_timeout_secs: 60,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("get_timeout_secs", self.get_timeout_secs),
            ("submit_timeout_secs", self.submit_timeout_secs),
            ("poll_timeout_secs", self.poll_timeout_secs),
            ("delete_timeout_secs", self.delete_timeout_secs),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        Ok(())
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_secs(self.get_timeout_secs)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }
}
