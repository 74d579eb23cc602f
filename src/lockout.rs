//! Per-account lockout after repeated credential failures.
//!
//! The lockout state lives on the credential record itself
//! (`failed_attempts` + `locked_until`), so it survives restarts and
//! is shared by every server instance. All transitions are written
//! through the store's version-checked update and retried on
//! conflict, so two concurrent failures against the same account both
//! count.
//!
//! # Tracing Events
//!
//! - `auth.lockout.account_locked` - Threshold reached, account locked
//! - `auth.lockout.attempts_cleared` - Counter reset after success

use crate::error::{AuthError, Result};
use crate::storage::{CredentialRecord, CredentialStore};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Default number of failures before the account locks.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lock window.
pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30 * 60);

/// Retries for the optimistic-concurrency write before giving up.
const CAS_ATTEMPTS: usize = 8;

/// Lockout policy configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures allowed before locking.
    pub max_attempts: u32,
    /// How long the account stays locked.
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lock_duration: DEFAULT_LOCK_DURATION,
        }
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, lock_duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lock_duration,
        }
    }

    /// Stricter preset: 3 attempts, one-hour lock.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            max_attempts: 3,
            lock_duration: Duration::from_secs(60 * 60),
        }
    }

    /// Evaluate a record's lockout state at a point in time.
    ///
    /// An elapsed lock reads as `Unlocked` with a zeroed counter; the
    /// persisted fields are cleaned up by the next write.
    #[must_use]
    pub fn evaluate(&self, record: &CredentialRecord, now: SystemTime) -> LockoutState {
        match record.locked_until {
            Some(until) if now < until => LockoutState::Locked { until },
            Some(_) => LockoutState::Unlocked { failed_attempts: 0 },
            None => LockoutState::Unlocked {
                failed_attempts: record.failed_attempts,
            },
        }
    }
}

/// Current lockout state of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockoutState {
    Unlocked { failed_attempts: u32 },
    Locked { until: SystemTime },
}

impl LockoutState {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// Seconds until the lock elapses (0 when unlocked).
    #[must_use]
    pub fn remaining_wait_seconds(&self, now: SystemTime) -> u64 {
        match self {
            Self::Locked { until } => until
                .duration_since(now)
                .map(|d| d.as_secs().max(1))
                .unwrap_or(0),
            Self::Unlocked { .. } => 0,
        }
    }
}

/// Outcome of recording a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailedAttemptOutcome {
    /// Failure count after this attempt (0 once locked).
    pub failed_attempts: u32,
    /// Set when this failure tripped the threshold.
    pub locked_until: Option<SystemTime>,
}

impl FailedAttemptOutcome {
    #[must_use]
    pub fn now_locked(&self) -> bool {
        self.locked_until.is_some()
    }
}

/// Applies lockout transitions through the credential store.
pub struct LockoutManager<S: CredentialStore> {
    store: Arc<S>,
    policy: LockoutPolicy,
}

impl<S: CredentialStore> LockoutManager<S> {
    #[must_use]
    pub fn new(store: Arc<S>, policy: LockoutPolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Reject locked accounts before any hash work is spent on them.
    pub fn check(&self, record: &CredentialRecord, now: SystemTime) -> Result<()> {
        let state = self.policy.evaluate(record, now);
        if state.is_locked() {
            return Err(AuthError::account_locked(state.remaining_wait_seconds(now)));
        }
        Ok(())
    }

    /// Record a failed password attempt, locking the account when the
    /// threshold is reached.
    pub async fn record_failure(
        &self,
        record: &CredentialRecord,
    ) -> Result<FailedAttemptOutcome> {
        let mut current = record.clone();

        for _ in 0..CAS_ATTEMPTS {
            let now = SystemTime::now();
            let attempts = match self.policy.evaluate(&current, now) {
                // A failure while locked should not happen (callers
                // check first), but restarting the count is the safe
                // reading if it does.
                LockoutState::Locked { .. } => 0,
                LockoutState::Unlocked { failed_attempts } => failed_attempts,
            } + 1;

            let outcome = if attempts >= self.policy.max_attempts {
                FailedAttemptOutcome {
                    failed_attempts: 0,
                    locked_until: Some(now + self.policy.lock_duration),
                }
            } else {
                FailedAttemptOutcome {
                    failed_attempts: attempts,
                    locked_until: None,
                }
            };

            let written = self
                .store
                .update_lockout(
                    &current.id,
                    current.version,
                    outcome.failed_attempts,
                    outcome.locked_until,
                )
                .await?;

            if written {
                if let Some(until) = outcome.locked_until {
                    tracing::warn!(
                        target: "auth.lockout.account_locked",
                        user_id = %current.id,
                        attempts = self.policy.max_attempts,
                        locked_for_secs = self.policy.lock_duration.as_secs(),
                        locked_until = ?until,
                        "Account locked after repeated failed logins"
                    );
                }
                return Ok(outcome);
            }

            // Version conflict: someone else wrote first. Re-read and
            // fold our failure on top of theirs.
            current = self
                .store
                .find_by_id(&current.id)
                .await?
                .ok_or(AuthError::InvalidCredentials)?;
        }

        Err(AuthError::store_unavailable(
            "lockout update contention, giving up",
        ))
    }

    /// Clear the failure counter after a successful authentication.
    pub async fn record_success(&self, record: &CredentialRecord) -> Result<()> {
        if record.failed_attempts == 0 && record.locked_until.is_none() {
            return Ok(());
        }

        let mut current = record.clone();
        for _ in 0..CAS_ATTEMPTS {
            if self
                .store
                .update_lockout(&current.id, current.version, 0, None)
                .await?
            {
                tracing::debug!(
                    target: "auth.lockout.attempts_cleared",
                    user_id = %current.id,
                    "Failed-attempt counter cleared"
                );
                return Ok(());
            }
            match self.store.find_by_id(&current.id).await? {
                Some(fresh) => current = fresh,
                None => return Ok(()),
            }
            // Another writer may already have cleared it.
            if current.failed_attempts == 0 && current.locked_until.is_none() {
                return Ok(());
            }
        }

        Err(AuthError::store_unavailable(
            "lockout clear contention, giving up",
        ))
    }
}
