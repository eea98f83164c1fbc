//! Platform-specific named locks for Windows, Linux and other Unix systems

#[cfg(windows)]
pub mod windows;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(all(unix, not(target_os = "linux")))]
pub mod unix;

use crate::core::{ClaimAttempt, LockBackend, NamespaceSupport};
use crate::error::LockError;

/// Whether this platform supports session-scoped synchronization names
pub fn namespace_support() -> NamespaceSupport {
    if cfg!(windows) {
        NamespaceSupport::SessionScoped
    } else {
        NamespaceSupport::Flat
    }
}

/// The operating system's named-lock facility. Every primitive used here is
/// released by the kernel when the owning process dies.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLocks;

impl LockBackend for SystemLocks {
    fn namespace_support(&self) -> NamespaceSupport {
        namespace_support()
    }

    fn try_claim(&self, name: &str) -> Result<ClaimAttempt, LockError> {
        #[cfg(windows)]
        {
            windows::try_claim(name)
        }
        #[cfg(target_os = "linux")]
        {
            linux::try_claim(name)
        }
        #[cfg(all(unix, not(target_os = "linux")))]
        {
            unix::try_claim(name)
        }
        #[cfg(not(any(windows, unix)))]
        {
            let _ = name;
            Err(LockError::Unsupported)
        }
    }
}
