//! Credential login with lockout, MFA, and rate limiting.
//!
//! The check order is fixed: IP rate limit, account lookup, lockout
//! state, password, MFA, then session and tokens. Nothing after a
//! failed step runs, and the externally visible outcomes are limited
//! to invalid-credentials, locked, MFA-required, and rate-limited.
//!
//! # Tracing Events
//!
//! - `auth.login.success` - Completed login
//! - `auth.login.failed` - Wrong password (lockout counter bumped)
//! - `auth.login.unknown_email` - Login against no account
//! - `auth.login.mfa_failed` - Wrong one-time or backup code
//! - `auth.login.backup_code_used` - Backup code consumed
//! - `auth.login.hash_upgraded` - Digest rehashed at new cost

use crate::error::{AuthError, Result};
use crate::flows::retry_read;
use crate::flows::types::AuthSuccess;
use crate::lockout::{LockoutManager, LockoutPolicy};
use crate::mfa::{BackupCodeGenerator, TotpVerifier};
use crate::password::PasswordHasher;
use crate::ratelimit::{KeyedRateLimiter, RateLimitPolicy};
use crate::sessions::{hash_refresh_token, DeviceFingerprint, SessionManager, SessionStore};
use crate::storage::{CredentialRecord, CredentialStore};
use crate::token::TokenIssuer;
use std::sync::Arc;
use std::time::SystemTime;

/// Login input.
#[derive(Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// One-time or backup code; required when the account has MFA.
    pub mfa_code: Option<String>,
    pub remember_me: bool,
    pub fingerprint: DeviceFingerprint,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("mfa_code", &self.mfa_code.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// The login operation.
pub struct LoginFlow<C, S>
where
    C: CredentialStore,
    S: SessionStore,
{
    credentials: Arc<C>,
    sessions: Arc<SessionManager<S>>,
    issuer: TokenIssuer,
    hasher: PasswordHasher,
    lockout: LockoutManager<C>,
    totp: TotpVerifier,
    rate_limiter: KeyedRateLimiter,
    upgrade_hashes: bool,
}

impl<C, S> LoginFlow<C, S>
where
    C: CredentialStore,
    S: SessionStore,
{
    #[must_use]
    pub fn new(
        credentials: Arc<C>,
        sessions: Arc<SessionManager<S>>,
        issuer: TokenIssuer,
        hasher: PasswordHasher,
        totp: TotpVerifier,
    ) -> Self {
        let lockout = LockoutManager::new(credentials.clone(), LockoutPolicy::default());
        Self {
            credentials,
            sessions,
            issuer,
            hasher,
            lockout,
            totp,
            rate_limiter: KeyedRateLimiter::new(RateLimitPolicy::login()),
            upgrade_hashes: true,
        }
    }

    #[must_use]
    pub fn with_lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.lockout = LockoutManager::new(self.credentials.clone(), policy);
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limiter = KeyedRateLimiter::new(policy);
        self
    }

    /// Disable transparent digest upgrades on successful login.
    #[must_use]
    pub fn without_hash_upgrades(mut self) -> Self {
        self.upgrade_hashes = false;
        self
    }

    /// Authenticate and establish a session.
    pub async fn login(&self, request: LoginRequest, ip: Option<&str>) -> Result<AuthSuccess> {
        if let Some(ip) = ip {
            self.rate_limiter.consume(ip)?;
        }

        let email = request.email.trim().to_lowercase();
        let Some(record) = retry_read(|| self.credentials.find_by_email(&email)).await? else {
            // Unknown account still pays for a verification, so the
            // miss is not observable through response timing.
            self.hasher.dummy_verify(&request.password);
            tracing::debug!(
                target: "auth.login.unknown_email",
                "Login attempt for unknown email"
            );
            return Err(AuthError::InvalidCredentials);
        };

        // Locked accounts are rejected before any hash work.
        self.lockout.check(&record, SystemTime::now())?;

        if !self.hasher.verify(&request.password, &record.password_hash) {
            let outcome = self.lockout.record_failure(&record).await?;
            tracing::warn!(
                target: "auth.login.failed",
                user_id = %record.id,
                failed_attempts = outcome.failed_attempts,
                now_locked = outcome.now_locked(),
                "Login failed: wrong password"
            );
            return Err(AuthError::InvalidCredentials);
        }

        self.lockout.record_success(&record).await?;
        self.maybe_upgrade_hash(&record, &request.password).await;

        let mfa_verified = if record.mfa_enabled {
            self.verify_mfa(&record, request.mfa_code.as_deref()).await?;
            true
        } else {
            false
        };

        let session_id = SessionManager::<S>::new_session_id();
        let tokens = self.issuer.issue_pair(
            &record.id,
            &session_id,
            mfa_verified,
            request.remember_me,
        )?;
        self.sessions
            .create_with_id(
                &session_id,
                &record.id,
                &hash_refresh_token(&tokens.refresh_token),
                request.fingerprint,
                mfa_verified,
                request.remember_me,
            )
            .await?;

        tracing::info!(
            target: "auth.login.success",
            user_id = %record.id,
            session_id = %session_id,
            mfa_verified = mfa_verified,
            "Login successful"
        );

        Ok(AuthSuccess {
            user_id: record.id,
            email: record.email,
            session_id,
            mfa_verified,
            tokens,
        })
    }

    /// Check a TOTP code, falling back to single-use backup codes.
    ///
    /// An MFA failure is its own condition: it does not feed the
    /// password-lockout counter, since reaching this point already
    /// proved the password. The login rate limiter covers guessing.
    async fn verify_mfa(&self, record: &CredentialRecord, code: Option<&str>) -> Result<()> {
        let Some(code) = code else {
            return Err(AuthError::MfaRequired);
        };

        if let Some(secret) = record.mfa_secret.as_deref() {
            if self.totp.verify(secret, code) {
                return Ok(());
            }
        }

        if let Some(index) = BackupCodeGenerator::verify(code, &record.backup_codes) {
            self.credentials
                .remove_backup_code(&record.id, index)
                .await?;
            tracing::info!(
                target: "auth.login.backup_code_used",
                user_id = %record.id,
                remaining = record.backup_codes.len().saturating_sub(1),
                "Backup code consumed"
            );
            return Ok(());
        }

        tracing::warn!(
            target: "auth.login.mfa_failed",
            user_id = %record.id,
            "MFA verification failed"
        );
        Err(AuthError::MfaInvalid)
    }

    /// Best-effort digest upgrade; a store hiccup here must not fail
    /// a login that already verified.
    async fn maybe_upgrade_hash(&self, record: &CredentialRecord, password: &str) {
        if !self.upgrade_hashes || !self.hasher.needs_rehash(&record.password_hash) {
            return;
        }
        let Ok(new_hash) = self.hasher.hash(password) else {
            return;
        };
        match self
            .credentials
            .update_password_digest(&record.id, &new_hash)
            .await
        {
            Ok(()) => tracing::debug!(
                target: "auth.login.hash_upgraded",
                user_id = %record.id,
                "Password digest upgraded to current parameters"
            ),
            Err(err) => tracing::debug!(
                target: "auth.login.hash_upgraded",
                user_id = %record.id,
                error = %err,
                "Password digest upgrade failed, keeping old digest"
            ),
        }
    }
}
