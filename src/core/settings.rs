//! Arbiter settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::arbiter::FailurePolicy;
use super::claim;
use crate::error::ConfigError;

/// Upper bound for the dialog timeout
pub const MAX_NOTIFY_TIMEOUT_SECS: u64 = 600;

/// Settings for arbitration and notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefix placed before the identity digest in the claim name
    pub app_prefix: String,
    /// Result reported when the lock facility fails
    pub failure_policy: FailurePolicy,
    /// How long the notification dialog may block, in seconds
    pub notify_timeout_secs: u64,
    /// Skip the dialog and write the notice to the console
    pub console_only: bool,
    /// Hash this path instead of the running executable's path
    pub identity_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_prefix: "onlyone".to_string(),
            failure_policy: FailurePolicy::FailOpen,
            notify_timeout_secs: 30,
            console_only: false,
            identity_path: None,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        claim::validate_prefix(&self.app_prefix)?;
        if self.notify_timeout_secs == 0 || self.notify_timeout_secs > MAX_NOTIFY_TIMEOUT_SECS {
            return Err(ConfigError::NotifyTimeout {
                got: self.notify_timeout_secs,
                max: MAX_NOTIFY_TIMEOUT_SECS,
            });
        }
        Ok(())
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}
