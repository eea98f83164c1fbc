//! onlyone - Detect whether this executable is the sole running instance
//!
//! The running executable's path is hashed into an [`ExecutableIdentity`],
//! which names a system-wide exclusive lock. An [`InstanceArbiter`] claims
//! that lock atomically and reports whether this process got it. When it did
//! not, a [`Notifier`] tells the user.

pub mod core;
pub mod error;
pub mod notify;
pub mod platform;

pub use crate::core::{
    Arbitration, ArbitrationResult, ExecutableIdentity, FailurePolicy, InstanceArbiter, Settings,
};
pub use crate::error::{ConfigError, LockError, NotifyError};
pub use crate::notify::{DialogPresenter, FallbackNotifier, Notice, Notifier, NotifyOutcome};
pub use crate::platform::SystemLocks;

/// Application name constant
pub const APP_NAME: &str = "onlyone";

/// Process exit status when another instance holds the claim
pub const EXIT_ALREADY_RUNNING: i32 = 3;
