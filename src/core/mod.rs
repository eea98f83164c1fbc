//! Core module - Executable identity, claim naming, arbitration and settings

pub mod arbiter;
pub mod claim;
pub mod identity;
pub mod settings;

pub use arbiter::{
    Arbitration, ArbitrationResult, ClaimAttempt, FailurePolicy, HeldLock, IdentityInput,
    InstanceArbiter, LockBackend,
};
pub use claim::NamespaceSupport;
pub use identity::{ExecutableIdentity, IdentitySource, ResolvedPath};
pub use settings::Settings;
