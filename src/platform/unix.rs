//! Named lock for Unix systems without abstract sockets (macOS, BSDs)
//!
//! Uses a non-blocking exclusive `flock` on `<tmp>/<name>.lock`. The kernel
//! drops the lock when the descriptor closes, including on process death.
//! The file itself is never removed: unlinking a lock file lets a late opener
//! lock an orphaned inode while a new file is created under the same name.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;

use fs2::FileExt;
use tracing::debug;

use crate::core::{ClaimAttempt, HeldLock};
use crate::error::LockError;

/// Path of the lock file backing `name`
pub fn lock_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.lock", name))
}

/// Whether a failed try-lock means another holder rather than a fault
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

struct FlockClaim {
    name: String,
    file: File,
}

impl HeldLock for FlockClaim {
    fn release(self: Box<Self>) -> Result<(), LockError> {
        FileExt::unlock(&self.file).map_err(|source| LockError::Release {
            name: self.name.clone(),
            source,
        })?;
        debug!("Unlocked '{}'", self.name);
        Ok(())
    }
}

pub fn try_claim(name: &str) -> Result<ClaimAttempt, LockError> {
    let os_err = |source| LockError::Os {
        name: name.to_string(),
        source,
    };

    let path = lock_path(name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(os_err)?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            debug!("Locked {:?}", path);
            Ok(ClaimAttempt::Created(Box::new(FlockClaim {
                name: name.to_string(),
                file,
            })))
        }
        Err(e) if is_contended(&e) => Ok(ClaimAttempt::Existing),
        Err(e) => Err(os_err(e)),
    }
}
