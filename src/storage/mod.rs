//! Credential storage contract.
//!
//! The core never talks to a database directly. Implement
//! [`CredentialStore`] for your storage layer; every mutation the
//! lockout machine performs goes through the version-checked
//! [`CredentialStore::update_lockout`], so concurrent handlers for the
//! same account cannot lose updates.

use crate::error::Result;
use async_trait::async_trait;
use std::time::SystemTime;

/// A user credential record as this core sees it.
///
/// Owned by the credential store; the core reads and writes only these
/// fields. `version` is an opaque optimistic-concurrency counter the
/// store bumps on every write.
#[derive(Clone)]
pub struct CredentialRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub failed_attempts: u32,
    pub locked_until: Option<SystemTime>,
    pub password_changed_at: SystemTime,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<String>,
    pub backup_codes: Vec<String>,
    pub reset_token_hash: Option<String>,
    pub reset_expires_at: Option<SystemTime>,
    pub version: u64,
}

// Secrets stay out of debug output and logs.
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("failed_attempts", &self.failed_attempts)
            .field("locked_until", &self.locked_until)
            .field("password_changed_at", &self.password_changed_at)
            .field("mfa_enabled", &self.mfa_enabled)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Fields required to create a credential record at signup.
#[derive(Clone)]
pub struct NewCredential {
    pub email: String,
    pub password_hash: String,
}

/// A pending reset claim returned by
/// [`CredentialStore::consume_reset_token`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResetClaim {
    pub user_id: String,
    pub expires_at: SystemTime,
}

/// Storage operations the authentication core requires.
///
/// Implementations surface transient backend failures as
/// [`crate::AuthError::StoreUnavailable`]; the orchestrator retries
/// idempotent reads, never writes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a record by email (implementations match case-insensitively
    /// or store emails pre-normalized).
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CredentialRecord>>;

    async fn email_exists(&self, email: &str) -> Result<bool>;

    async fn create(&self, new: NewCredential) -> Result<CredentialRecord>;

    /// Write lockout fields iff the record's version still equals
    /// `expected_version`. Returns `false` on a version conflict; the
    /// caller re-reads and retries.
    async fn update_lockout(
        &self,
        id: &str,
        expected_version: u64,
        failed_attempts: u32,
        locked_until: Option<SystemTime>,
    ) -> Result<bool>;

    /// Replace the password hash, advance `password_changed_at`, and
    /// clear any pending reset fields in one write.
    async fn update_password(
        &self,
        id: &str,
        password_hash: &str,
        changed_at: SystemTime,
    ) -> Result<()>;

    /// Swap the password digest without touching
    /// `password_changed_at`. Used for transparent cost-parameter
    /// upgrades on login, which must not invalidate live tokens.
    async fn update_password_digest(&self, id: &str, password_hash: &str) -> Result<()>;

    /// Store a pending password-reset token hash with its expiry,
    /// replacing any previous pending reset.
    async fn set_reset_token(
        &self,
        id: &str,
        token_hash: &str,
        expires_at: SystemTime,
    ) -> Result<()>;

    /// Look up and clear a pending reset by its token hash.
    ///
    /// Clearing happens regardless of expiry, which is what makes the
    /// code single-use; the caller checks `expires_at`.
    async fn consume_reset_token(&self, token_hash: &str) -> Result<Option<ResetClaim>>;

    /// Enable MFA with the given TOTP secret and backup codes.
    async fn enable_mfa(
        &self,
        id: &str,
        secret: &str,
        backup_codes: Vec<String>,
    ) -> Result<()>;

    /// Remove a consumed backup code by index.
    async fn remove_backup_code(&self, id: &str, index: usize) -> Result<()>;
}

/// In-memory implementation for tests and examples.
#[cfg(any(test, feature = "test-stores"))]
pub mod test {
    use super::*;
    use crate::error::AuthError;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// In-memory credential store.
    ///
    /// Keyed by normalized email; versions increment on every write so
    /// the CAS path is exercised the same way a real backend would.
    #[derive(Default)]
    pub struct InMemoryCredentialStore {
        records: RwLock<HashMap<String, CredentialRecord>>,
    }

    impl InMemoryCredentialStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn key(email: &str) -> String {
            email.trim().to_lowercase()
        }

        /// Direct record access for test assertions.
        pub fn get(&self, email: &str) -> Option<CredentialRecord> {
            self.records.read().unwrap().get(&Self::key(email)).cloned()
        }

        fn with_record_by_id<F>(&self, id: &str, f: F) -> Result<()>
        where
            F: FnOnce(&mut CredentialRecord),
        {
            let mut records = self.records.write().unwrap();
            let record = records
                .values_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("no such credential: {id}")))?;
            f(record);
            record.version += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl CredentialStore for InMemoryCredentialStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>> {
            Ok(self.records.read().unwrap().get(&Self::key(email)).cloned())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<CredentialRecord>> {
            Ok(self
                .records
                .read()
                .unwrap()
                .values()
                .find(|r| r.id == id)
                .cloned())
        }

        async fn email_exists(&self, email: &str) -> Result<bool> {
            Ok(self.records.read().unwrap().contains_key(&Self::key(email)))
        }

        async fn create(&self, new: NewCredential) -> Result<CredentialRecord> {
            let record = CredentialRecord {
                id: uuid::Uuid::new_v4().to_string(),
                email: Self::key(&new.email),
                password_hash: new.password_hash,
                failed_attempts: 0,
                locked_until: None,
                password_changed_at: SystemTime::now(),
                mfa_enabled: false,
                mfa_secret: None,
                backup_codes: Vec::new(),
                reset_token_hash: None,
                reset_expires_at: None,
                version: 0,
            };
            self.records
                .write()
                .unwrap()
                .insert(record.email.clone(), record.clone());
            Ok(record)
        }

        async fn update_lockout(
            &self,
            id: &str,
            expected_version: u64,
            failed_attempts: u32,
            locked_until: Option<SystemTime>,
        ) -> Result<bool> {
            let mut records = self.records.write().unwrap();
            let Some(record) = records.values_mut().find(|r| r.id == id) else {
                return Ok(false);
            };
            if record.version != expected_version {
                return Ok(false);
            }
            record.failed_attempts = failed_attempts;
            record.locked_until = locked_until;
            record.version += 1;
            Ok(true)
        }

        async fn update_password(
            &self,
            id: &str,
            password_hash: &str,
            changed_at: SystemTime,
        ) -> Result<()> {
            self.with_record_by_id(id, |r| {
                r.password_hash = password_hash.to_string();
                r.password_changed_at = changed_at;
                r.reset_token_hash = None;
                r.reset_expires_at = None;
            })
        }

        async fn update_password_digest(&self, id: &str, password_hash: &str) -> Result<()> {
            self.with_record_by_id(id, |r| {
                r.password_hash = password_hash.to_string();
            })
        }

        async fn set_reset_token(
            &self,
            id: &str,
            token_hash: &str,
            expires_at: SystemTime,
        ) -> Result<()> {
            self.with_record_by_id(id, |r| {
                r.reset_token_hash = Some(token_hash.to_string());
                r.reset_expires_at = Some(expires_at);
            })
        }

        async fn consume_reset_token(&self, token_hash: &str) -> Result<Option<ResetClaim>> {
            let mut records = self.records.write().unwrap();
            let Some(record) = records
                .values_mut()
                .find(|r| r.reset_token_hash.as_deref() == Some(token_hash))
            else {
                return Ok(None);
            };
            let claim = ResetClaim {
                user_id: record.id.clone(),
                expires_at: record
                    .reset_expires_at
                    .unwrap_or(SystemTime::UNIX_EPOCH),
            };
            record.reset_token_hash = None;
            record.reset_expires_at = None;
            record.version += 1;
            Ok(Some(claim))
        }

        async fn enable_mfa(
            &self,
            id: &str,
            secret: &str,
            backup_codes: Vec<String>,
        ) -> Result<()> {
            self.with_record_by_id(id, |r| {
                r.mfa_enabled = true;
                r.mfa_secret = Some(secret.to_string());
                r.backup_codes = backup_codes;
            })
        }

        async fn remove_backup_code(&self, id: &str, index: usize) -> Result<()> {
            self.with_record_by_id(id, |r| {
                if index < r.backup_codes.len() {
                    r.backup_codes.remove(index);
                }
            })
        }
    }

}
