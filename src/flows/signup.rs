//! Account creation.
//!
//! # Tracing Events
//!
//! - `auth.signup.success` - Account created and logged in

use crate::error::{AuthError, Result};
use crate::flows::retry_read;
use crate::flows::types::AuthSuccess;
use crate::password::PasswordHasher;
use crate::sessions::{hash_refresh_token, DeviceFingerprint, SessionManager, SessionStore};
use crate::storage::{CredentialStore, NewCredential};
use crate::token::TokenIssuer;
use std::sync::Arc;

/// Signup input.
#[derive(Clone)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub fingerprint: DeviceFingerprint,
    pub remember_me: bool,
}

impl std::fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignupRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Creates a credential record and logs the new user straight in.
pub struct SignupFlow<C, S>
where
    C: CredentialStore,
    S: SessionStore,
{
    credentials: Arc<C>,
    sessions: Arc<SessionManager<S>>,
    issuer: TokenIssuer,
    hasher: PasswordHasher,
}

impl<C, S> SignupFlow<C, S>
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
    ) -> Self {
        Self {
            credentials,
            sessions,
            issuer,
            hasher,
        }
    }

    /// Create the account, a session, and a token pair. MFA is never
    /// required at signup; the account starts without it.
    pub async fn signup(&self, request: SignupRequest) -> Result<AuthSuccess> {
        let email = request.email.trim().to_lowercase();

        if retry_read(|| self.credentials.email_exists(&email)).await? {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hasher.hash(&request.password)?;
        let record = self
            .credentials
            .create(NewCredential {
                email: email.clone(),
                password_hash,
            })
            .await?;

        let session_id = SessionManager::<S>::new_session_id();
        let tokens = self.issuer.issue_pair(
            &record.id,
            &session_id,
            false,
            request.remember_me,
        )?;
        self.sessions
            .create_with_id(
                &session_id,
                &record.id,
                &hash_refresh_token(&tokens.refresh_token),
                request.fingerprint,
                false,
                request.remember_me,
            )
            .await?;

        tracing::info!(
            target: "auth.signup.success",
            user_id = %record.id,
            "Account created"
        );

        Ok(AuthSuccess {
            user_id: record.id,
            email: record.email,
            session_id,
            mfa_verified: false,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::PasswordConfig;
    use crate::sessions::test::InMemorySessionStore;
    use crate::storage::test::InMemoryCredentialStore;
    use crate::token::TokenIssuerConfig;

    fn flow() -> (
        Arc<InMemoryCredentialStore>,
        Arc<SessionManager<InMemorySessionStore>>,
        SignupFlow<InMemoryCredentialStore, InMemorySessionStore>,
    ) {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));
        let issuer = TokenIssuer::new(TokenIssuerConfig::with_secret("test", b"secret"));
        let flow = SignupFlow::new(
            credentials.clone(),
            sessions.clone(),
            issuer,
            PasswordHasher::new(PasswordConfig::fast()),
        );
        (credentials, sessions, flow)
    }

    fn request(email: &str) -> SignupRequest {
        SignupRequest {
            email: email.into(),
            password: "initial-password".into(),
            fingerprint: DeviceFingerprint::new().with_ip("10.1.1.1"),
            remember_me: false,
        }
    }

    #[tokio::test]
    async fn test_signup_creates_account_and_session() {
        let (credentials, sessions, flow) = flow();
        let success = flow.signup(request("New@Example.com")).await.unwrap();

        assert_eq!(success.email, "new@example.com");
        assert!(!success.mfa_verified);

        let record = credentials.get("new@example.com").unwrap();
        assert_eq!(record.id, success.user_id);

        let session = sessions
            .find_active(
                &success.user_id,
                &hash_refresh_token(&success.tokens.refresh_token),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.id, success.session_id);
    }

    #[tokio::test]
    async fn test_signup_tokens_verify() {
        let (_, _, flow) = flow();
        let success = flow.signup(request("a@b.c")).await.unwrap();

        let issuer = TokenIssuer::new(TokenIssuerConfig::with_secret("test", b"secret"));
        let access = issuer.verify_access(&success.tokens.access_token).unwrap();
        assert_eq!(access.sub, success.user_id);
        assert!(!access.mfa_verified);

        let refresh = issuer.verify_refresh(&success.tokens.refresh_token).unwrap();
        assert_eq!(refresh.session_id, success.session_id);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (_, _, flow) = flow();
        flow.signup(request("a@b.c")).await.unwrap();

        let err = flow.signup(request("A@B.C")).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn test_password_stored_hashed() {
        let (credentials, _, flow) = flow();
        flow.signup(request("a@b.c")).await.unwrap();

        let record = credentials.get("a@b.c").unwrap();
        assert_ne!(record.password_hash, "initial-password");
        assert!(PasswordHasher::new(PasswordConfig::fast())
            .verify("initial-password", &record.password_hash));
    }

    #[test]
    fn test_request_debug_hides_password() {
        let debug = format!("{:?}", request("a@b.c"));
        assert!(!debug.contains("initial-password"));
    }
}
