//! Windows named lock: a kernel mutex created with initial ownership

use std::io;

use tracing::{debug, warn};

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, TRUE};
use windows::Win32::System::Threading::{CreateMutexW, ReleaseMutex};

use crate::core::{ClaimAttempt, HeldLock};
use crate::error::LockError;

fn to_io_error(err: windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(err.code().0 & 0xFFFF)
}

struct NamedMutexClaim {
    name: String,
    handle: HANDLE,
    closed: bool,
}

// SAFETY: a mutex HANDLE is a kernel object reference that may be used from
// any thread. The claim is never shared, only moved.
unsafe impl Send for NamedMutexClaim {}

impl NamedMutexClaim {
    fn dispose(&mut self) -> Result<(), LockError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        unsafe {
            // Fails with ERROR_NOT_OWNER when called from a thread other than
            // the creator; closing the last handle still destroys the object.
            if let Err(e) = ReleaseMutex(self.handle) {
                warn!("ReleaseMutex for '{}' failed: {}", self.name, e);
            }
            CloseHandle(self.handle).map_err(|e| LockError::Release {
                name: self.name.clone(),
                source: to_io_error(e),
            })
        }
    }
}

impl HeldLock for NamedMutexClaim {
    fn release(mut self: Box<Self>) -> Result<(), LockError> {
        debug!("Releasing mutex '{}'", self.name);
        self.dispose()
    }
}

impl Drop for NamedMutexClaim {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

pub fn try_claim(name: &str) -> Result<ClaimAttempt, LockError> {
    let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

    unsafe {
        let handle =
            CreateMutexW(None, TRUE, PCWSTR(wide.as_ptr())).map_err(|e| LockError::Os {
                name: name.to_string(),
                source: to_io_error(e),
            })?;

        // Nothing may run between CreateMutexW and this check
        if GetLastError() == ERROR_ALREADY_EXISTS {
            return CloseHandle(handle)
                .map(|()| ClaimAttempt::Existing)
                .map_err(|e| LockError::ExistingCleanup {
                    name: name.to_string(),
                    source: to_io_error(e),
                });
        }

        Ok(ClaimAttempt::Created(Box::new(NamedMutexClaim {
            name: name.to_string(),
            handle,
            closed: false,
        })))
    }
}
