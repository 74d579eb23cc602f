//! Active refresh-token sessions: creation, rotation, revocation.
//!
//! A session is one authenticated device lineage. The raw refresh
//! token is never stored; the session record holds its SHA-256 hash,
//! and rotation is a compare-and-swap on that hash. Presenting a hash
//! that no longer matches the current one means the token was already
//! rotated; someone is replaying it, and the whole session is
//! revoked before the error surfaces.
//!
//! # Tracing Events
//!
//! - `auth.session.created` - New session created on login/signup
//! - `auth.session.rotated` - Refresh token rotated
//! - `auth.session.replay_detected` - Stale refresh token presented
//! - `auth.session.revoked` - Session explicitly revoked
//! - `auth.session.revoke_all` - All sessions revoked for a user

use crate::error::{AuthError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::SystemTime;

/// IPv6 addresses max out at 45 characters.
const MAX_IP_LENGTH: usize = 45;

/// Clamp user-agent strings so a hostile client cannot bloat records.
const MAX_USER_AGENT_LENGTH: usize = 512;

/// Where a session was established from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl DeviceFingerprint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(truncate(ip.into(), MAX_IP_LENGTH));
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(truncate(ua.into(), MAX_USER_AGENT_LENGTH));
        self
    }
}

fn truncate(s: String, max_len: usize) -> String {
    if s.len() <= max_len {
        s
    } else {
        s.chars().take(max_len).collect()
    }
}

/// One active (or revoked) session lineage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id, independent of any token value.
    pub id: String,
    pub user_id: String,
    /// SHA-256 of the current refresh token. Never serialized out.
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    pub fingerprint: DeviceFingerprint,
    /// Whether the login that established this session completed MFA.
    /// Fixed at creation: rotation never upgrades a session's standing.
    pub mfa_verified: bool,
    /// Whether the login asked for the extended refresh lifetime.
    /// Carried across rotations so replacements keep the same TTL.
    pub remember_me: bool,
    pub created_at: SystemTime,
    pub rotated_at: SystemTime,
    pub revoked: bool,
}

/// Result of the store-level compare-and-swap rotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Hash matched; the record now carries the new hash.
    Rotated(SessionRecord),
    /// The presented hash is not the session's current hash.
    HashMismatch,
    /// No such session, or it is already revoked.
    NotFound,
}

/// Session persistence contract.
///
/// `rotate_session` must be atomic with respect to concurrent calls on
/// the same session: of two racing rotations with the same expected
/// hash, exactly one may win; the other sees `HashMismatch`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, record: SessionRecord) -> Result<()>;

    /// Find the active (non-revoked) session matching this user and
    /// current token hash.
    async fn find_active(
        &self,
        user_id: &str,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionRecord>>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Swap the current hash for a new one iff it equals
    /// `expected_hash`, touching `rotated_at`.
    async fn rotate_session(
        &self,
        session_id: &str,
        expected_hash: &str,
        new_hash: &str,
        rotated_at: SystemTime,
    ) -> Result<RotateOutcome>;

    /// Returns `true` if the session existed and was active.
    async fn revoke_session(&self, session_id: &str) -> Result<bool>;

    /// Returns the number of sessions revoked.
    async fn revoke_all_sessions(&self, user_id: &str) -> Result<usize>;
}

/// Hash a raw refresh token for storage or lookup.
///
/// SHA-256 is enough here: refresh tokens are high-entropy signed
/// blobs, not guessable passwords.
#[must_use]
pub fn hash_refresh_token(raw_token: &str) -> String {
    let digest = Sha256::digest(raw_token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Session operations with replay defense and tracing.
pub struct SessionManager<S: SessionStore> {
    store: Arc<S>,
    revoke_all_on_replay: bool,
}

impl<S: SessionStore> SessionManager<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            revoke_all_on_replay: false,
        }
    }

    /// Widen the replay blast radius to every session the user has.
    #[must_use]
    pub fn revoke_all_on_replay(mut self, enabled: bool) -> Self {
        self.revoke_all_on_replay = enabled;
        self
    }

    /// Allocate a session id ahead of record creation, so the refresh
    /// token can embed it before the record exists.
    #[must_use]
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Create a plain session: no MFA standing, default lifetime.
    pub async fn create(
        &self,
        user_id: &str,
        refresh_token_hash: &str,
        fingerprint: DeviceFingerprint,
    ) -> Result<SessionRecord> {
        self.create_with_id(
            &Self::new_session_id(),
            user_id,
            refresh_token_hash,
            fingerprint,
            false,
            false,
        )
        .await
    }

    /// Create a session under a pre-allocated id, recording the MFA
    /// standing and remember-me choice the login established.
    pub async fn create_with_id(
        &self,
        session_id: &str,
        user_id: &str,
        refresh_token_hash: &str,
        fingerprint: DeviceFingerprint,
        mfa_verified: bool,
        remember_me: bool,
    ) -> Result<SessionRecord> {
        let now = SystemTime::now();
        let record = SessionRecord {
            id: session_id.to_string(),
            user_id: user_id.to_string(),
            refresh_token_hash: refresh_token_hash.to_string(),
            fingerprint,
            mfa_verified,
            remember_me,
            created_at: now,
            rotated_at: now,
            revoked: false,
        };
        self.store.create_session(record.clone()).await?;

        tracing::info!(
            target: "auth.session.created",
            session_id = %record.id,
            user_id = %user_id,
            ip_address = record.fingerprint.ip_address.as_deref().unwrap_or("unknown"),
            "New session created"
        );
        Ok(record)
    }

    /// Rotate a session to a new refresh-token hash.
    ///
    /// A hash mismatch is treated as token replay: the session is
    /// revoked (and, if configured, all of the user's sessions)
    /// before `SessionReplay` is returned.
    pub async fn rotate(
        &self,
        session_id: &str,
        presented_hash: &str,
        new_hash: &str,
    ) -> Result<SessionRecord> {
        let outcome = self
            .store
            .rotate_session(session_id, presented_hash, new_hash, SystemTime::now())
            .await?;

        match outcome {
            RotateOutcome::Rotated(record) => {
                tracing::debug!(
                    target: "auth.session.rotated",
                    session_id = %session_id,
                    user_id = %record.user_id,
                    "Refresh token rotated"
                );
                Ok(record)
            }
            RotateOutcome::HashMismatch => {
                self.handle_replay(session_id).await?;
                Err(AuthError::SessionReplay)
            }
            RotateOutcome::NotFound => Err(AuthError::SessionNotFound),
        }
    }

    async fn handle_replay(&self, session_id: &str) -> Result<()> {
        let user_id = self
            .store
            .get_session(session_id)
            .await?
            .map(|s| s.user_id);

        tracing::error!(
            target: "auth.session.replay_detected",
            session_id = %session_id,
            user_id = user_id.as_deref().unwrap_or("unknown"),
            revoke_all = self.revoke_all_on_replay,
            "SECURITY: stale refresh token presented, revoking session"
        );

        self.store.revoke_session(session_id).await?;
        if self.revoke_all_on_replay {
            if let Some(user_id) = user_id {
                self.store.revoke_all_sessions(&user_id).await?;
            }
        }
        Ok(())
    }

    pub async fn find_active(
        &self,
        user_id: &str,
        refresh_token_hash: &str,
    ) -> Result<Option<SessionRecord>> {
        self.store.find_active(user_id, refresh_token_hash).await
    }

    /// Fetch a session by id, revoked or not.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.store.get_session(session_id).await
    }

    pub async fn revoke(&self, session_id: &str) -> Result<bool> {
        let revoked = self.store.revoke_session(session_id).await?;
        if revoked {
            tracing::info!(
                target: "auth.session.revoked",
                session_id = %session_id,
                "Session revoked"
            );
        }
        Ok(revoked)
    }

    pub async fn revoke_all(&self, user_id: &str) -> Result<usize> {
        let count = self.store.revoke_all_sessions(user_id).await?;
        tracing::warn!(
            target: "auth.session.revoke_all",
            user_id = %user_id,
            count = count,
            "All sessions revoked"
        );
        Ok(count)
    }
}

/// In-memory implementation for tests and examples.
#[cfg(any(test, feature = "test-stores"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// In-memory session store.
    ///
    /// The rotation CAS holds the write lock across the
    /// compare-and-swap, which is exactly the atomicity a real backend
    /// provides with a conditional update.
    #[derive(Default)]
    pub struct InMemorySessionStore {
        sessions: RwLock<HashMap<String, SessionRecord>>,
    }

    impl InMemorySessionStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SessionStore for InMemorySessionStore {
        async fn create_session(&self, record: SessionRecord) -> Result<()> {
            self.sessions
                .write()
                .unwrap()
                .insert(record.id.clone(), record);
            Ok(())
        }

        async fn find_active(
            &self,
            user_id: &str,
            refresh_token_hash: &str,
        ) -> Result<Option<SessionRecord>> {
            let sessions = self.sessions.read().unwrap();
            Ok(sessions
                .values()
                .find(|s| {
                    !s.revoked
                        && s.user_id == user_id
                        && s.refresh_token_hash == refresh_token_hash
                })
                .cloned())
        }

        async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
            Ok(self.sessions.read().unwrap().get(session_id).cloned())
        }

        async fn rotate_session(
            &self,
            session_id: &str,
            expected_hash: &str,
            new_hash: &str,
            rotated_at: SystemTime,
        ) -> Result<RotateOutcome> {
            let mut sessions = self.sessions.write().unwrap();
            let Some(record) = sessions.get_mut(session_id) else {
                return Ok(RotateOutcome::NotFound);
            };
            if record.revoked {
                return Ok(RotateOutcome::NotFound);
            }
            if record.refresh_token_hash != expected_hash {
                return Ok(RotateOutcome::HashMismatch);
            }
            record.refresh_token_hash = new_hash.to_string();
            record.rotated_at = rotated_at;
            Ok(RotateOutcome::Rotated(record.clone()))
        }

        async fn revoke_session(&self, session_id: &str) -> Result<bool> {
            let mut sessions = self.sessions.write().unwrap();
            match sessions.get_mut(session_id) {
                Some(record) if !record.revoked => {
                    record.revoked = true;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn revoke_all_sessions(&self, user_id: &str) -> Result<usize> {
            let mut sessions = self.sessions.write().unwrap();
            let mut count = 0;
            for record in sessions.values_mut() {
                if record.user_id == user_id && !record.revoked {
                    record.revoked = true;
                    count += 1;
                }
            }
            Ok(count)
        }
    }

}
