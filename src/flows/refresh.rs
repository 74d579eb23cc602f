//! Refresh-token rotation.
//!
//! Each refresh verifies the presented token, mints a replacement, and
//! swaps the session's stored hash to the new token in one
//! compare-and-swap. A token that loses that swap was already used: the
//! session is revoked and the caller sees a replay error.
//!
//! # Tracing Events
//!
//! - `auth.refresh.success` - Token pair rotated

use crate::error::{AuthError, Result};
use crate::flows::retry_read;
use crate::flows::types::AuthSuccess;
use crate::sessions::{hash_refresh_token, SessionManager, SessionStore};
use crate::storage::CredentialStore;
use crate::token::{TokenIssuer, TokenPair};
use std::sync::Arc;

/// The refresh operation.
pub struct RefreshFlow<C, S>
where
    C: CredentialStore,
    S: SessionStore,
{
    credentials: Arc<C>,
    sessions: Arc<SessionManager<S>>,
    issuer: TokenIssuer,
}

impl<C, S> RefreshFlow<C, S>
where
    C: CredentialStore,
    S: SessionStore,
{
    #[must_use]
    pub fn new(
        credentials: Arc<C>,
        sessions: Arc<SessionManager<S>>,
        issuer: TokenIssuer,
    ) -> Self {
        Self {
            credentials,
            sessions,
            issuer,
        }
    }

    /// Exchange a refresh token for a fresh pair, rotating the session.
    ///
    /// The new refresh token is minted before the rotation so the swap
    /// can install its hash atomically; if the rotation loses, the
    /// minted tokens are discarded and never reach the caller.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSuccess> {
        let claims = self.issuer.verify_refresh(refresh_token)?;
        let presented_hash = hash_refresh_token(refresh_token);

        // The session carries the flags the login fixed at creation:
        // MFA standing never upgrades across rotations, and the
        // remember-me lifetime never silently shortens.
        let session = retry_read(|| self.sessions.get(&claims.session_id))
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let new_refresh =
            self.issuer
                .issue_refresh(&claims.sub, &claims.session_id, session.remember_me)?;
        let record = self
            .sessions
            .rotate(
                &claims.session_id,
                &presented_hash,
                &hash_refresh_token(&new_refresh),
            )
            .await?;

        // A signed token naming someone else's session means key
        // compromise or a store mix-up. Reject either way.
        if record.user_id != claims.sub {
            return Err(AuthError::TokenInvalid);
        }

        let credential = retry_read(|| self.credentials.find_by_id(&claims.sub))
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        let access_token = self
            .issuer
            .issue_access(&claims.sub, record.mfa_verified)?;

        tracing::debug!(
            target: "auth.refresh.success",
            user_id = %claims.sub,
            session_id = %claims.session_id,
            "Token pair rotated"
        );

        Ok(AuthSuccess {
            user_id: credential.id,
            email: credential.email,
            session_id: claims.session_id,
            mfa_verified: record.mfa_verified,
            tokens: TokenPair {
                access_token,
                refresh_token: new_refresh,
                expires_in: self.issuer.access_ttl().as_secs(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::signup::{SignupFlow, SignupRequest};
    use crate::password::{PasswordConfig, PasswordHasher};
    use crate::sessions::test::InMemorySessionStore;
    use crate::sessions::DeviceFingerprint;
    use crate::storage::test::InMemoryCredentialStore;
    use crate::token::TokenIssuerConfig;

    struct Fixture {
        credentials: Arc<InMemoryCredentialStore>,
        sessions: Arc<SessionManager<InMemorySessionStore>>,
        flow: RefreshFlow<InMemoryCredentialStore, InMemorySessionStore>,
        success: AuthSuccess,
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(TokenIssuerConfig::with_secret("test", b"secret"))
    }

    async fn fixture_with_remember_me(remember_me: bool) -> Fixture {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));
        let signup = SignupFlow::new(
            credentials.clone(),
            sessions.clone(),
            issuer(),
            PasswordHasher::new(PasswordConfig::fast()),
        );
        let success = signup
            .signup(SignupRequest {
                email: "user@example.com".into(),
                password: "initial-password".into(),
                fingerprint: DeviceFingerprint::new(),
                remember_me,
            })
            .await
            .unwrap();

        let flow = RefreshFlow::new(credentials.clone(), sessions.clone(), issuer());
        Fixture {
            credentials,
            sessions,
            flow,
            success,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_remember_me(false).await
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_keeps_session_id() {
        let f = fixture().await;
        let rotated = f
            .flow
            .refresh(&f.success.tokens.refresh_token)
            .await
            .unwrap();

        assert_eq!(rotated.session_id, f.success.session_id);
        assert_eq!(rotated.user_id, f.success.user_id);
        assert_ne!(
            rotated.tokens.refresh_token,
            f.success.tokens.refresh_token
        );

        // Store now matches only the new token.
        assert!(f
            .sessions
            .find_active(
                &f.success.user_id,
                &hash_refresh_token(&rotated.tokens.refresh_token)
            )
            .await
            .unwrap()
            .is_some());
        assert!(f
            .sessions
            .find_active(
                &f.success.user_id,
                &hash_refresh_token(&f.success.tokens.refresh_token)
            )
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reused_token_is_replay_and_kills_session() {
        let f = fixture().await;
        let rotated = f
            .flow
            .refresh(&f.success.tokens.refresh_token)
            .await
            .unwrap();

        let err = f
            .flow
            .refresh(&f.success.tokens.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionReplay));

        // The legitimate successor token is dead too.
        let err = f
            .flow
            .refresh(&rotated.tokens.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_refresh_after_session_revoked() {
        let f = fixture().await;
        f.sessions.revoke(&f.success.session_id).await.unwrap();

        let err = f
            .flow
            .refresh(&f.success.tokens.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_access_token_rejected_as_refresh() {
        let f = fixture().await;
        let err = f
            .flow
            .refresh(&f.success.tokens.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn test_foreign_signature_rejected() {
        let f = fixture().await;
        let forged = TokenIssuer::new(TokenIssuerConfig::with_secret("test", b"other-secret"))
            .issue_refresh(&f.success.user_id, &f.success.session_id, false)
            .unwrap();
        let err = f.flow.refresh(&forged).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn test_new_access_token_verifies() {
        let f = fixture().await;
        let rotated = f
            .flow
            .refresh(&f.success.tokens.refresh_token)
            .await
            .unwrap();

        let claims = issuer().verify_access(&rotated.tokens.access_token).unwrap();
        assert_eq!(claims.sub, f.success.user_id);
        assert!(!claims.mfa_verified);
    }

    #[tokio::test]
    async fn test_refresh_never_upgrades_mfa_standing() {
        let f = fixture().await;

        // The account enables MFA after this session was established
        // with a password alone. Rotation must not mint tokens that
        // claim an MFA check that never happened.
        f.credentials
            .enable_mfa(&f.success.user_id, "SECRET", vec![])
            .await
            .unwrap();

        let rotated = f
            .flow
            .refresh(&f.success.tokens.refresh_token)
            .await
            .unwrap();
        assert!(!rotated.mfa_verified);

        let claims = issuer().verify_access(&rotated.tokens.access_token).unwrap();
        assert!(!claims.mfa_verified);
    }

    #[tokio::test]
    async fn test_remember_me_lifetime_survives_rotation() {
        let f = fixture_with_remember_me(true).await;
        let rotated = f
            .flow
            .refresh(&f.success.tokens.refresh_token)
            .await
            .unwrap();

        let claims = issuer()
            .verify_refresh(&rotated.tokens.refresh_token)
            .unwrap();
        // Still the extended lifetime, not the default one.
        assert!(claims.exp - claims.iat > crate::token::DEFAULT_REFRESH_TTL.as_secs());
    }
}
