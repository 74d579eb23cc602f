//! Password reset with single-use, time-boxed codes.
//!
//! The raw code exists only in the notification sent to the user;
//! only its SHA-256 hash is persisted, alongside an expiry (10
//! minutes by default). Redemption is single-use no matter the
//! outcome, rehashes the new password, advances
//! `password_changed_at` (superseding every outstanding access
//! token), and revokes all of the user's sessions.
//!
//! # Tracing Events
//!
//! - `auth.password.reset_requested` - Reset code issued
//! - `auth.password.reset_completed` - Password changed via reset
//! - `auth.password.reset_failed` - Invalid or expired code presented

use crate::error::{AuthError, Result};
use crate::password::PasswordHasher;
use crate::ratelimit::{KeyedRateLimiter, RateLimitPolicy};
use crate::sessions::{SessionManager, SessionStore};
use crate::storage::CredentialStore;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Default validity window for a reset code.
pub const DEFAULT_RESET_TTL: Duration = Duration::from_secs(10 * 60);

/// Outbound delivery seam for reset codes.
///
/// Implementations email (or SMS) the raw code; delivery guarantees
/// are theirs. The core never logs the code.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset_code(
        &self,
        email: &str,
        raw_code: &str,
        expires_in: Duration,
    ) -> Result<()>;
}

/// Issues and redeems password-reset codes.
pub struct PasswordResetFlow<C, S, N>
where
    C: CredentialStore,
    S: SessionStore,
    N: ResetNotifier,
{
    credentials: Arc<C>,
    sessions: Arc<SessionManager<S>>,
    notifier: Arc<N>,
    hasher: PasswordHasher,
    rate_limiter: KeyedRateLimiter,
    ttl: Duration,
}

impl<C, S, N> PasswordResetFlow<C, S, N>
where
    C: CredentialStore,
    S: SessionStore,
    N: ResetNotifier,
{
    #[must_use]
    pub fn new(
        credentials: Arc<C>,
        sessions: Arc<SessionManager<S>>,
        notifier: Arc<N>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            credentials,
            sessions,
            notifier,
            hasher,
            rate_limiter: KeyedRateLimiter::new(RateLimitPolicy::password_reset()),
            ttl: DEFAULT_RESET_TTL,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limiter = KeyedRateLimiter::new(policy);
        self
    }

    /// Request a reset code for an email address.
    ///
    /// Succeeds whether or not the email is registered, so the
    /// endpoint cannot be used to enumerate accounts. The code is
    /// persisted (hashed) before the notifier runs.
    pub async fn request_reset(&self, email: &str, ip: Option<&str>) -> Result<()> {
        if let Some(ip) = ip {
            self.rate_limiter.consume(ip)?;
        }

        let Some(record) = self.credentials.find_by_email(email).await? else {
            tracing::debug!(
                target: "auth.password.reset_requested",
                known_account = false,
                "Reset requested for unknown email"
            );
            return Ok(());
        };

        let raw_code = self.issue(&record.id).await?;
        self.notifier
            .send_reset_code(&record.email, &raw_code, self.ttl)
            .await?;

        tracing::info!(
            target: "auth.password.reset_requested",
            user_id = %record.id,
            known_account = true,
            expires_in_secs = self.ttl.as_secs(),
            "Password reset code issued"
        );
        Ok(())
    }

    /// Issue a raw reset code for a user, persisting only its hash.
    ///
    /// Replaces any previously pending code for the account.
    pub async fn issue(&self, user_id: &str) -> Result<String> {
        let raw_code = generate_reset_code();
        let expires_at = SystemTime::now() + self.ttl;
        self.credentials
            .set_reset_token(user_id, &hash_reset_code(&raw_code), expires_at)
            .await?;
        Ok(raw_code)
    }

    /// Redeem a raw code and set a new password.
    ///
    /// The code is consumed on lookup whatever happens next, so a
    /// second redemption of the same code is always
    /// `ResetCodeInvalid`.
    pub async fn complete_reset(&self, raw_code: &str, new_password: &str) -> Result<()> {
        let Some(claim) = self
            .credentials
            .consume_reset_token(&hash_reset_code(raw_code))
            .await?
        else {
            tracing::warn!(
                target: "auth.password.reset_failed",
                reason = "unknown_code",
                "Reset attempted with unknown or already-used code"
            );
            return Err(AuthError::ResetCodeInvalid);
        };

        if SystemTime::now() > claim.expires_at {
            tracing::warn!(
                target: "auth.password.reset_failed",
                user_id = %claim.user_id,
                reason = "expired",
                "Reset attempted with expired code"
            );
            return Err(AuthError::ResetCodeExpired);
        }

        let new_hash = self.hasher.hash(new_password)?;
        self.credentials
            .update_password(&claim.user_id, &new_hash, SystemTime::now())
            .await?;

        // Every existing session dies with the old password.
        let revoked = self.sessions.revoke_all(&claim.user_id).await?;

        tracing::info!(
            target: "auth.password.reset_completed",
            user_id = %claim.user_id,
            sessions_revoked = revoked,
            "Password reset completed"
        );
        Ok(())
    }
}

/// 256-bit random code, URL-safe for links.
fn generate_reset_code() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The at-rest form of a reset code.
#[must_use]
pub fn hash_reset_code(raw_code: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw_code.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::PasswordConfig;
    use crate::sessions::test::InMemorySessionStore;
    use crate::sessions::{hash_refresh_token, DeviceFingerprint};
    use crate::storage::test::InMemoryCredentialStore;
    use crate::storage::NewCredential;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResetNotifier for RecordingNotifier {
        async fn send_reset_code(
            &self,
            email: &str,
            raw_code: &str,
            _expires_in: Duration,
        ) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), raw_code.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        credentials: Arc<InMemoryCredentialStore>,
        sessions: Arc<SessionManager<InMemorySessionStore>>,
        notifier: Arc<RecordingNotifier>,
        flow: PasswordResetFlow<InMemoryCredentialStore, InMemorySessionStore, RecordingNotifier>,
    }

    async fn fixture() -> Fixture {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));
        let notifier = Arc::new(RecordingNotifier::default());
        let hasher = PasswordHasher::new(PasswordConfig::fast());

        credentials
            .create(NewCredential {
                email: "user@example.com".into(),
                password_hash: hasher.hash("old-password").unwrap(),
            })
            .await
            .unwrap();

        let flow = PasswordResetFlow::new(
            credentials.clone(),
            sessions.clone(),
            notifier.clone(),
            hasher,
        );
        Fixture {
            credentials,
            sessions,
            notifier,
            flow,
        }
    }

    fn sent_code(notifier: &RecordingNotifier) -> String {
        notifier.sent.lock().unwrap().last().unwrap().1.clone()
    }

    #[tokio::test]
    async fn test_request_then_complete() {
        let f = fixture().await;
        f.flow
            .request_reset("user@example.com", None)
            .await
            .unwrap();
        let code = sent_code(&f.notifier);

        f.flow.complete_reset(&code, "brand-new-pw").await.unwrap();

        let record = f.credentials.get("user@example.com").unwrap();
        let hasher = PasswordHasher::new(PasswordConfig::fast());
        assert!(hasher.verify("brand-new-pw", &record.password_hash));
        assert!(!hasher.verify("old-password", &record.password_hash));
        assert!(record.reset_token_hash.is_none());
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let f = fixture().await;
        f.flow
            .request_reset("user@example.com", None)
            .await
            .unwrap();
        let code = sent_code(&f.notifier);

        f.flow.complete_reset(&code, "new-pw").await.unwrap();
        let err = f.flow.complete_reset(&code, "another-pw").await.unwrap_err();
        assert!(matches!(err, AuthError::ResetCodeInvalid));
    }

    #[tokio::test]
    async fn test_expired_code_distinct_from_invalid() {
        let f = fixture().await;
        let flow = f.flow.with_ttl(Duration::from_millis(20));

        flow.request_reset("user@example.com", None).await.unwrap();
        let code = sent_code(&f.notifier);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = flow.complete_reset(&code, "new-pw").await.unwrap_err();
        assert!(matches!(err, AuthError::ResetCodeExpired));

        // Consumed on the expired attempt: second try is invalid.
        let err = flow.complete_reset(&code, "new-pw").await.unwrap_err();
        assert!(matches!(err, AuthError::ResetCodeInvalid));
    }

    #[tokio::test]
    async fn test_unknown_email_is_silent() {
        let f = fixture().await;
        f.flow
            .request_reset("nobody@example.com", None)
            .await
            .unwrap();
        assert!(f.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_code_is_invalid() {
        let f = fixture().await;
        let err = f
            .flow
            .complete_reset("not-a-real-code", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResetCodeInvalid));
    }

    #[tokio::test]
    async fn test_reset_revokes_all_sessions() {
        let f = fixture().await;
        let record = f.credentials.get("user@example.com").unwrap();
        let hash = hash_refresh_token("device-a-token");
        f.sessions
            .create(&record.id, &hash, DeviceFingerprint::new())
            .await
            .unwrap();

        f.flow
            .request_reset("user@example.com", None)
            .await
            .unwrap();
        let code = sent_code(&f.notifier);
        f.flow.complete_reset(&code, "new-pw").await.unwrap();

        assert!(f
            .sessions
            .find_active(&record.id, &hash)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_new_code_replaces_pending_one() {
        let f = fixture().await;
        f.flow
            .request_reset("user@example.com", None)
            .await
            .unwrap();
        let first = sent_code(&f.notifier);
        f.flow
            .request_reset("user@example.com", None)
            .await
            .unwrap();
        let second = sent_code(&f.notifier);

        let err = f.flow.complete_reset(&first, "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::ResetCodeInvalid));
        f.flow.complete_reset(&second, "pw").await.unwrap();
    }

    #[tokio::test]
    async fn test_request_rate_limited_by_ip() {
        let f = fixture().await;
        let flow = f
            .flow
            .with_rate_limit(RateLimitPolicy::new(2, Duration::from_secs(60)));

        flow.request_reset("user@example.com", Some("10.0.0.9"))
            .await
            .unwrap();
        flow.request_reset("user@example.com", Some("10.0.0.9"))
            .await
            .unwrap();
        let err = flow
            .request_reset("user@example.com", Some("10.0.0.9"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimited { .. }));
    }

    #[test]
    fn test_raw_codes_are_unique_and_hash_stable() {
        let a = generate_reset_code();
        let b = generate_reset_code();
        assert_ne!(a, b);
        assert_eq!(hash_reset_code(&a), hash_reset_code(&a));
        assert_ne!(hash_reset_code(&a), hash_reset_code(&b));
    }
}
