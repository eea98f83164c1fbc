//! Executable identity - Stable digest of the running executable's path

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Process-wide identity, computed on first use
static CURRENT: OnceLock<ExecutableIdentity> = OnceLock::new();

/// Where the hashed path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// The OS reported the running executable's path
    Executable,
    /// Executable introspection failed; the base directory was used instead
    BaseDirectory,
    /// Both introspection sources failed; the relative path "." was used
    Fallback,
    /// The caller supplied the path explicitly
    Explicit,
}

impl IdentitySource {
    /// Whether the path is coarser than the executable's own path
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::BaseDirectory | Self::Fallback)
    }
}

/// A path chosen as identity input, along with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub source: IdentitySource,
}

impl ResolvedPath {
    /// Resolve the running executable's path, falling back to the working directory
    pub fn resolve() -> Self {
        Self::resolve_with(
            || std::env::current_exe().and_then(|exe| exe.canonicalize().or(Ok(exe))),
            std::env::current_dir,
        )
    }

    /// Resolve using the given introspection sources. Never fails.
    pub fn resolve_with<E, B>(exe: E, base_dir: B) -> Self
    where
        E: FnOnce() -> io::Result<PathBuf>,
        B: FnOnce() -> io::Result<PathBuf>,
    {
        match exe() {
            Ok(path) => Self {
                path,
                source: IdentitySource::Executable,
            },
            Err(exe_err) => {
                warn!(
                    "Executable path unavailable ({}), falling back to base directory",
                    exe_err
                );
                match base_dir() {
                    Ok(path) => Self {
                        path,
                        source: IdentitySource::BaseDirectory,
                    },
                    Err(dir_err) => {
                        warn!("Base directory unavailable ({}), using '.'", dir_err);
                        Self {
                            path: PathBuf::from("."),
                            source: IdentitySource::Fallback,
                        }
                    }
                }
            }
        }
    }
}

/// Lowercase hex SHA-256 of the executable path. Equality and hashing
/// consider the digest only.
#[derive(Debug, Clone)]
pub struct ExecutableIdentity {
    digest: String,
    source: IdentitySource,
}

impl PartialEq for ExecutableIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for ExecutableIdentity {}

impl std::hash::Hash for ExecutableIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl ExecutableIdentity {
    /// Length of the hex digest
    pub const HEX_LEN: usize = 64;

    /// Identity of the running process, computed once and cached for the process lifetime
    pub fn current() -> &'static ExecutableIdentity {
        CURRENT.get_or_init(|| Self::from_resolved(&ResolvedPath::resolve()))
    }

    pub fn from_resolved(resolved: &ResolvedPath) -> Self {
        let mut identity = Self::from_path(&resolved.path);
        identity.source = resolved.source;
        identity
    }

    /// Hash an explicit path. UTF-8 paths hash their UTF-8 bytes; other
    /// paths hash their raw platform encoding, so no two paths collapse.
    pub fn from_path(path: &Path) -> Self {
        let digest = hex::encode(Sha256::digest(path.as_os_str().as_encoded_bytes()));
        debug!("Identity for {:?} is {}", path, digest);
        Self {
            digest,
            source: IdentitySource::Explicit,
        }
    }

    pub fn as_hex(&self) -> &str {
        &self.digest
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }
}

impl std::fmt::Display for ExecutableIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest)
    }
}
