//! Claim naming - Builds the system-visible name of the single-instance lock

use super::identity::ExecutableIdentity;
use crate::error::ConfigError;

/// Longest accepted application prefix. Keeps full claim names within
/// the 107-byte limit of Linux abstract socket names.
pub const MAX_PREFIX_LEN: usize = 40;

/// Session namespace prefix for Windows kernel object names
pub const SESSION_LOCAL_PREFIX: &str = "Local\\";

/// Whether the platform scopes named synchronization objects per login session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceSupport {
    /// Names can be prefixed to stay local to the login session
    SessionScoped,
    /// Only one flat namespace exists; the bare name is used
    Flat,
}

/// Validate an application prefix for use in claim names
pub fn validate_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
        return Err(ConfigError::PrefixLength {
            len: prefix.len(),
            max: MAX_PREFIX_LEN,
        });
    }
    let valid = prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(ConfigError::PrefixCharacters(prefix.to_string()));
    }
    Ok(())
}

/// `[Local\]<prefix>_<digest>`
pub fn claim_name(
    namespace: NamespaceSupport,
    app_prefix: &str,
    identity: &ExecutableIdentity,
) -> String {
    let session = match namespace {
        NamespaceSupport::SessionScoped => SESSION_LOCAL_PREFIX,
        NamespaceSupport::Flat => "",
    };
    format!("{}{}_{}", session, app_prefix, identity.as_hex())
}
