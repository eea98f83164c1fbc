//! Instance arbiter - Atomic test-and-claim of the single-instance lock
//!
//! The arbiter asks a [`LockBackend`] to create-or-open a system-wide named
//! lock in one step. Whether this process is first depends entirely on the
//! OS resolving that name atomically; the arbiter never checks and then
//! creates. It never waits for another holder either.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::claim::{self, NamespaceSupport};
use super::identity::ExecutableIdentity;
use super::settings::Settings;
use crate::error::{ConfigError, LockError};
use crate::platform::SystemLocks;

/// Ownership of a named lock created by this process
pub trait HeldLock: Send {
    /// Give up ownership and dispose the handle
    fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Result of a single create-or-open call
pub enum ClaimAttempt {
    /// The object did not exist; it was created and is now owned by us
    Created(Box<dyn HeldLock>),
    /// The object already existed; nothing is retained
    Existing,
}

impl std::fmt::Debug for ClaimAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created(_) => f.write_str("Created"),
            Self::Existing => f.write_str("Existing"),
        }
    }
}

/// A system facility for named exclusive locks
pub trait LockBackend: Send + Sync {
    /// Whether names may be scoped to the login session
    fn namespace_support(&self) -> NamespaceSupport;

    /// Atomically create-and-own or detect an existing lock named `name`.
    /// Must return immediately.
    fn try_claim(&self, name: &str) -> Result<ClaimAttempt, LockError>;
}

/// Outcome of arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationResult {
    /// This process is the first instance and holds the claim
    Acquired,
    /// Another process holds the claim
    AlreadyHeld,
    /// The lock facility failed; the process may run (fail-open)
    IndeterminateAllowRun,
}

impl ArbitrationResult {
    /// Whether startup should proceed
    pub fn should_run(&self) -> bool {
        !matches!(self, Self::AlreadyHeld)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::AlreadyHeld => "already-held",
            Self::IndeterminateAllowRun => "indeterminate",
        }
    }
}

/// Arbitration result together with the claim name it concerns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arbitration {
    pub result: ArbitrationResult,
    pub claim_name: String,
    /// Backend fault that the failure policy turned into `result`
    pub fault: Option<String>,
}

impl Arbitration {
    /// Process exit status the host should use, or `None` to keep running
    pub fn exit_code(&self) -> Option<i32> {
        match self.result {
            ArbitrationResult::AlreadyHeld => Some(crate::EXIT_ALREADY_RUNNING),
            ArbitrationResult::Acquired | ArbitrationResult::IndeterminateAllowRun => None,
        }
    }

    /// Whether another process was actually seen holding the claim
    pub fn is_conflict(&self) -> bool {
        self.result == ArbitrationResult::AlreadyHeld && self.fault.is_none()
    }
}

/// What to report when the lock facility itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the process run
    #[default]
    FailOpen,
    /// Treat the fault as if another instance held the claim
    FailClosed,
}

impl FailurePolicy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FailOpen => "fail-open",
            Self::FailClosed => "fail-closed",
        }
    }

    /// Map a backend fault to an arbitration result
    pub fn on_fault(&self) -> ArbitrationResult {
        match self {
            Self::FailOpen => ArbitrationResult::IndeterminateAllowRun,
            Self::FailClosed => ArbitrationResult::AlreadyHeld,
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-open" | "fail_open" => Ok(Self::FailOpen),
            "fail-closed" | "fail_closed" => Ok(Self::FailClosed),
            other => Err(format!(
                "unknown failure policy '{}', expected 'fail-open' or 'fail-closed'",
                other
            )),
        }
    }
}

/// Path whose digest identifies "this executable"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityInput {
    /// Introspect the running process
    CurrentExecutable,
    /// Hash the given path
    Path(PathBuf),
}

enum ClaimState {
    Unclaimed,
    Owned {
        name: String,
        lock: Box<dyn HeldLock>,
    },
    /// Not owned, and not retried for the lifetime of this arbiter
    Settled(Arbitration),
}

/// Decides whether this process is the only running instance
pub struct InstanceArbiter<B: LockBackend = SystemLocks> {
    backend: B,
    app_prefix: String,
    policy: FailurePolicy,
    identity_input: IdentityInput,
    identity: OnceLock<ExecutableIdentity>,
    state: Mutex<ClaimState>,
}

impl InstanceArbiter<SystemLocks> {
    /// Arbiter over the platform's named locks
    pub fn new(app_prefix: &str) -> Result<Self, ConfigError> {
        Self::with_backend(SystemLocks, app_prefix)
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let mut arbiter = Self::new(&settings.app_prefix)?.with_policy(settings.failure_policy);
        if let Some(path) = &settings.identity_path {
            arbiter = arbiter.with_identity_path(path.clone());
        }
        Ok(arbiter)
    }
}

impl<B: LockBackend> InstanceArbiter<B> {
    pub fn with_backend(backend: B, app_prefix: &str) -> Result<Self, ConfigError> {
        claim::validate_prefix(app_prefix)?;
        Ok(Self {
            backend,
            app_prefix: app_prefix.to_string(),
            policy: FailurePolicy::default(),
            identity_input: IdentityInput::CurrentExecutable,
            identity: OnceLock::new(),
            state: Mutex::new(ClaimState::Unclaimed),
        })
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Hash `path` instead of the running executable's path
    pub fn with_identity_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_input = IdentityInput::Path(path.into());
        self.identity = OnceLock::new();
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Identity, computed on first use
    pub fn identity(&self) -> &ExecutableIdentity {
        self.identity.get_or_init(|| match &self.identity_input {
            IdentityInput::CurrentExecutable => ExecutableIdentity::current().clone(),
            IdentityInput::Path(path) => ExecutableIdentity::from_path(path),
        })
    }

    pub fn claim_name(&self) -> String {
        claim::claim_name(
            self.backend.namespace_support(),
            &self.app_prefix,
            self.identity(),
        )
    }

    pub fn is_owned(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            ClaimState::Owned { .. }
        )
    }

    /// Claim the named lock. Never blocks on another holder.
    ///
    /// Calls after the first return the earlier outcome: an owned claim is
    /// reported again as `Acquired`, and `AlreadyHeld` or
    /// `IndeterminateAllowRun` are not retried. Only `release` resets the
    /// arbiter to unclaimed.
    pub fn try_acquire(&self) -> Arbitration {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match &*state {
            ClaimState::Owned { name, .. } => {
                return Arbitration {
                    result: ArbitrationResult::Acquired,
                    claim_name: name.clone(),
                    fault: None,
                }
            }
            ClaimState::Settled(arbitration) => return arbitration.clone(),
            ClaimState::Unclaimed => {}
        }

        let name = self.claim_name();
        debug!("Attempting claim '{}'", name);

        let (result, fault) = match self.backend.try_claim(&name) {
            Ok(ClaimAttempt::Created(lock)) => {
                info!("Acquired single-instance claim '{}'", name);
                *state = ClaimState::Owned {
                    name: name.clone(),
                    lock,
                };
                return Arbitration {
                    result: ArbitrationResult::Acquired,
                    claim_name: name,
                    fault: None,
                };
            }
            Ok(ClaimAttempt::Existing) => {
                info!("Claim '{}' is held by another process", name);
                (ArbitrationResult::AlreadyHeld, None)
            }
            Err(e) => {
                let result = self.policy.on_fault();
                warn!(
                    "Claim '{}' is indeterminate ({}); {} policy reports {}",
                    name,
                    e,
                    self.policy.label(),
                    result.label()
                );
                (result, Some(e.to_string()))
            }
        };

        let arbitration = Arbitration {
            result,
            claim_name: name,
            fault,
        };
        *state = ClaimState::Settled(arbitration.clone());
        arbitration
    }

    /// Release an owned claim. Idempotent, never fails.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, ClaimState::Owned { .. }) {
            return;
        }

        if let ClaimState::Owned { name, lock } = std::mem::replace(&mut *state, ClaimState::Unclaimed)
        {
            match lock.release() {
                Ok(()) => info!("Released single-instance claim '{}'", name),
                Err(e) => warn!("Ignoring failure while releasing claim '{}': {}", name, e),
            }
        }
    }
}

impl<B: LockBackend> Drop for InstanceArbiter<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// In-memory stand-in for the OS name table
    #[derive(Clone, Default)]
    struct MemoryLocks {
        names: Arc<Mutex<HashSet<String>>>,
        claims: Arc<AtomicUsize>,
    }

    struct MemoryClaim {
        name: String,
        names: Arc<Mutex<HashSet<String>>>,
    }

    impl HeldLock for MemoryClaim {
        fn release(self: Box<Self>) -> Result<(), LockError> {
            self.names.lock().unwrap().remove(&self.name);
            Ok(())
        }
    }

    impl LockBackend for MemoryLocks {
        fn namespace_support(&self) -> NamespaceSupport {
            NamespaceSupport::Flat
        }

        fn try_claim(&self, name: &str) -> Result<ClaimAttempt, LockError> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            let mut names = self.names.lock().unwrap();
            if names.insert(name.to_string()) {
                Ok(ClaimAttempt::Created(Box::new(MemoryClaim {
                    name: name.to_string(),
                    names: self.names.clone(),
                })))
            } else {
                Ok(ClaimAttempt::Existing)
            }
        }
    }

    struct DeniedLocks;

    impl LockBackend for DeniedLocks {
        fn namespace_support(&self) -> NamespaceSupport {
            NamespaceSupport::SessionScoped
        }

        fn try_claim(&self, name: &str) -> Result<ClaimAttempt, LockError> {
            Err(LockError::Os {
                name: name.to_string(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            })
        }
    }

    struct ExistingThenFault;

    impl LockBackend for ExistingThenFault {
        fn namespace_support(&self) -> NamespaceSupport {
            NamespaceSupport::Flat
        }

        fn try_claim(&self, name: &str) -> Result<ClaimAttempt, LockError> {
            Err(LockError::ExistingCleanup {
                name: name.to_string(),
                source: io::Error::other("close failed"),
            })
        }
    }

    struct FailingRelease {
        released: Arc<AtomicUsize>,
    }

    struct FailingClaim {
        released: Arc<AtomicUsize>,
    }

    impl HeldLock for FailingClaim {
        fn release(self: Box<Self>) -> Result<(), LockError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Err(LockError::Release {
                name: "x".to_string(),
                source: io::Error::other("handle already closed"),
            })
        }
    }

    impl LockBackend for FailingRelease {
        fn namespace_support(&self) -> NamespaceSupport {
            NamespaceSupport::Flat
        }

        fn try_claim(&self, _name: &str) -> Result<ClaimAttempt, LockError> {
            Ok(ClaimAttempt::Created(Box::new(FailingClaim {
                released: self.released.clone(),
            })))
        }
    }

    const APP_PATH: &str = "/opt/app/app.bin";
    const APP_DIGEST: &str = "531365af167f384d962f06abf3ff802c53f5adb76fbf70d13707e5e207800f42";

    fn memory_arbiter(locks: &MemoryLocks) -> InstanceArbiter<MemoryLocks> {
        InstanceArbiter::with_backend(locks.clone(), "testapp")
            .unwrap()
            .with_identity_path(APP_PATH)
    }

    /// Arbiter on the real OS primitive with a prefix no other test shares
    fn system_arbiter(prefix: &str) -> InstanceArbiter {
        InstanceArbiter::new(prefix)
            .unwrap()
            .with_identity_path(APP_PATH)
    }

    fn unique_prefix() -> String {
        format!("t{}", uuid::Uuid::new_v4().simple())
    }

    #[test]
    fn test_first_acquires_second_sees_held() {
        let locks = MemoryLocks::default();
        let first = memory_arbiter(&locks);
        let second = memory_arbiter(&locks);

        let a = first.try_acquire();
        assert_eq!(a.result, ArbitrationResult::Acquired);
        assert!(a.claim_name.contains(APP_DIGEST));

        let b = second.try_acquire();
        assert_eq!(b.result, ArbitrationResult::AlreadyHeld);
        assert_eq!(a.claim_name, b.claim_name);
        assert!(b.is_conflict());
        assert_eq!(b.exit_code(), Some(crate::EXIT_ALREADY_RUNNING));
        assert_eq!(a.exit_code(), None);
        assert!(!second.is_owned());
    }

    #[test]
    fn test_release_allows_new_caller() {
        let locks = MemoryLocks::default();
        let first = memory_arbiter(&locks);
        assert_eq!(first.try_acquire().result, ArbitrationResult::Acquired);
        first.release();
        assert!(!first.is_owned());

        let next = memory_arbiter(&locks);
        assert_eq!(next.try_acquire().result, ArbitrationResult::Acquired);
    }

    #[test]
    fn test_release_is_idempotent() {
        let locks = MemoryLocks::default();
        let arbiter = memory_arbiter(&locks);
        arbiter.release();
        assert_eq!(arbiter.try_acquire().result, ArbitrationResult::Acquired);
        arbiter.release();
        arbiter.release();
        assert!(locks.names.lock().unwrap().is_empty());
    }

    #[test]
    fn test_release_after_already_held_keeps_other_claim() {
        let locks = MemoryLocks::default();
        let owner = memory_arbiter(&locks);
        let other = memory_arbiter(&locks);
        owner.try_acquire();
        assert_eq!(other.try_acquire().result, ArbitrationResult::AlreadyHeld);
        other.release();
        assert!(owner.is_owned());
        assert_eq!(locks.names.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_releases_claim() {
        let locks = MemoryLocks::default();
        {
            let arbiter = memory_arbiter(&locks);
            assert_eq!(arbiter.try_acquire().result, ArbitrationResult::Acquired);
        }
        assert!(locks.names.lock().unwrap().is_empty());
    }

    #[test]
    fn test_repeat_acquire_does_not_touch_backend() {
        let locks = MemoryLocks::default();
        let arbiter = memory_arbiter(&locks);
        let first = arbiter.try_acquire();
        let second = arbiter.try_acquire();
        assert_eq!(first, second);
        assert_eq!(locks.claims.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_already_held_is_terminal() {
        let locks = MemoryLocks::default();
        let owner = memory_arbiter(&locks);
        let other = memory_arbiter(&locks);
        owner.try_acquire();
        other.try_acquire();
        owner.release();

        assert_eq!(other.try_acquire().result, ArbitrationResult::AlreadyHeld);
        assert_eq!(locks.claims.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fault_fails_open_by_default() {
        let arbiter = InstanceArbiter::with_backend(DeniedLocks, "testapp")
            .unwrap()
            .with_identity_path(APP_PATH);
        let outcome = arbiter.try_acquire();
        assert_eq!(outcome.result, ArbitrationResult::IndeterminateAllowRun);
        assert!(outcome.result.should_run());
        assert_eq!(outcome.claim_name, format!("Local\\testapp_{}", APP_DIGEST));
        assert!(outcome.fault.is_some());
        assert_eq!(outcome.exit_code(), None);
        arbiter.release();
    }

    #[test]
    fn test_fault_fails_closed_when_configured() {
        let arbiter = InstanceArbiter::with_backend(DeniedLocks, "testapp")
            .unwrap()
            .with_identity_path(APP_PATH)
            .with_policy(FailurePolicy::FailClosed);
        let outcome = arbiter.try_acquire();
        assert_eq!(outcome.result, ArbitrationResult::AlreadyHeld);
        assert_eq!(outcome.exit_code(), Some(crate::EXIT_ALREADY_RUNNING));
        assert!(!outcome.is_conflict());
        assert!(outcome
            .fault
            .as_deref()
            .is_some_and(|f| f.contains("permission denied")));
    }

    #[test]
    fn test_existing_then_fault_follows_policy() {
        let open = InstanceArbiter::with_backend(ExistingThenFault, "testapp").unwrap();
        assert_eq!(
            open.try_acquire().result,
            ArbitrationResult::IndeterminateAllowRun
        );

        let closed = InstanceArbiter::with_backend(ExistingThenFault, "testapp")
            .unwrap()
            .with_policy(FailurePolicy::FailClosed);
        assert_eq!(closed.try_acquire().result, ArbitrationResult::AlreadyHeld);
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let released = Arc::new(AtomicUsize::new(0));
        let arbiter = InstanceArbiter::with_backend(
            FailingRelease {
                released: released.clone(),
            },
            "testapp",
        )
        .unwrap()
        .with_identity_path(APP_PATH);

        arbiter.try_acquire();
        arbiter.release();
        arbiter.release();
        drop(arbiter);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        assert!(InstanceArbiter::with_backend(MemoryLocks::default(), "bad/prefix").is_err());
    }

    #[test]
    fn test_shared_arbiter_serializes_callers() {
        let locks = MemoryLocks::default();
        let arbiter = Arc::new(memory_arbiter(&locks));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let arbiter = arbiter.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    arbiter.try_acquire().result
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), ArbitrationResult::Acquired);
        }
        assert_eq!(locks.claims.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!(
            "fail-open".parse::<FailurePolicy>(),
            Ok(FailurePolicy::FailOpen)
        );
        assert_eq!(
            "fail_closed".parse::<FailurePolicy>(),
            Ok(FailurePolicy::FailClosed)
        );
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_system_lock_acquire_and_conflict() {
        let prefix = unique_prefix();
        let first = system_arbiter(&prefix);
        let second = system_arbiter(&prefix);

        let a = first.try_acquire();
        assert_eq!(a.result, ArbitrationResult::Acquired);
        let b = second.try_acquire();
        assert_eq!(b.result, ArbitrationResult::AlreadyHeld);
        assert_eq!(a.claim_name, b.claim_name);
    }

    #[test]
    fn test_system_lock_release_then_reacquire() {
        let prefix = unique_prefix();
        let first = system_arbiter(&prefix);
        assert_eq!(first.try_acquire().result, ArbitrationResult::Acquired);
        first.release();
        first.release();

        let next = system_arbiter(&prefix);
        assert_eq!(next.try_acquire().result, ArbitrationResult::Acquired);
    }

    #[test]
    fn test_system_lock_dropped_owner_frees_claim() {
        let prefix = unique_prefix();
        drop({
            let owner = system_arbiter(&prefix);
            owner.try_acquire();
            owner
        });
        assert_eq!(
            system_arbiter(&prefix).try_acquire().result,
            ArbitrationResult::Acquired
        );
    }

    #[test]
    fn test_system_lock_race_has_one_winner() {
        let prefix = unique_prefix();
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let prefix = prefix.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let arbiter = system_arbiter(&prefix);
                    barrier.wait();
                    let result = arbiter.try_acquire().result;
                    // Keep every arbiter alive until all have attempted
                    barrier.wait();
                    result
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results
            .iter()
            .filter(|r| **r == ArbitrationResult::Acquired)
            .count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, ArbitrationResult::Acquired | ArbitrationResult::AlreadyHeld)));
    }
}
