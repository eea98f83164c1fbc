//! Error types shared by the arbiter, platform backends, notifier and settings

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure while talking to the operating system's named-lock facility
#[derive(Debug, Error)]
pub enum LockError {
    /// The primitive could not be created or opened
    #[error("failed to open named lock '{name}': {source}")]
    Os {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An existing claim was detected, but disposing our duplicate handle failed
    #[error("named lock '{name}' already exists, and closing the duplicate handle failed: {source}")]
    ExistingCleanup {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Releasing a held claim failed
    #[error("failed to release named lock '{name}': {source}")]
    Release {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The platform has no usable named-lock primitive
    #[error("named locks are not supported on this platform")]
    Unsupported,
}

/// Failure of the rich presentation path of the notifier
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("dialogs are disabled; console output requested")]
    Disabled,

    #[error("no graphical session is available")]
    Unavailable,

    #[error("dialog did not complete within {0:?}")]
    TimedOut(Duration),

    #[error("dialog presenter panicked")]
    Panicked,

    #[error("dialog failed: {0}")]
    Presentation(String),
}

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("app prefix must be 1 to {max} characters, got {len}")]
    PrefixLength { len: usize, max: usize },

    #[error("app prefix '{0}' may only contain ASCII letters, digits, '.', '_' and '-'")]
    PrefixCharacters(String),

    #[error("notify timeout must be between 1 and {max} seconds, got {got}")]
    NotifyTimeout { got: u64, max: u64 },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
