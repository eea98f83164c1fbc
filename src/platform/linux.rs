//! Linux named lock: a listening socket bound in the abstract namespace
//!
//! Abstract socket names live in the kernel only, so nothing touches the
//! filesystem. `bind` either takes the name or fails with `EADDRINUSE`, and
//! the name is freed as soon as the last descriptor closes, including when
//! the owning process is killed.

use std::io;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener};

use tracing::debug;

use crate::core::{ClaimAttempt, HeldLock};
use crate::error::LockError;

struct AbstractSocketClaim {
    name: String,
    _listener: UnixListener,
}

impl HeldLock for AbstractSocketClaim {
    fn release(self: Box<Self>) -> Result<(), LockError> {
        debug!("Closing abstract socket '{}'", self.name);
        Ok(())
    }
}

pub fn try_claim(name: &str) -> Result<ClaimAttempt, LockError> {
    let os_err = |source| LockError::Os {
        name: name.to_string(),
        source,
    };

    let addr = SocketAddr::from_abstract_name(name.as_bytes()).map_err(os_err)?;
    match UnixListener::bind_addr(&addr) {
        Ok(listener) => Ok(ClaimAttempt::Created(Box::new(AbstractSocketClaim {
            name: name.to_string(),
            _listener: listener,
        }))),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(ClaimAttempt::Existing),
        Err(e) => Err(os_err(e)),
    }
}
