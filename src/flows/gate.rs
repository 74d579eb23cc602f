//! Per-request authorization gate.
//!
//! Every protected call funnels through [`RequestGate::authorize`],
//! which turns a bearer token into a [`Principal`] or an error. The
//! check order is signature, revocation registry, account lookup,
//! password-change supersession, then MFA standing. Failed checks feed
//! a per-IP limiter so a client cycling through dead tokens gets cut
//! off instead of probing indefinitely.
//!
//! # Tracing Events
//!
//! - `auth.gate.revoked_token` - Revoked access token presented
//! - `auth.gate.superseded_token` - Token predates a password change

use crate::error::{AuthError, Result};
use crate::flows::retry_read;
use crate::ratelimit::{KeyedRateLimiter, RateLimitPolicy};
use crate::revocation::{RevocationRegistry, RevocationStore};
use crate::storage::CredentialStore;
use crate::token::TokenIssuer;
use std::sync::Arc;
use std::time::SystemTime;

/// Pull the token out of an `Authorization: Bearer <token>` value.
#[must_use]
pub fn extract_bearer(header: &str) -> Option<&str> {
    let rest = header.strip_prefix("Bearer ")?;
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// The authenticated identity a passed gate hands to the application.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    pub mfa_verified: bool,
    /// Token id, for revocation on logout.
    pub token_id: String,
    pub expires_at: SystemTime,
}

/// Validates access tokens against live account state.
pub struct RequestGate<C, R>
where
    C: CredentialStore,
    R: RevocationStore,
{
    credentials: Arc<C>,
    revocation: RevocationRegistry<R>,
    issuer: TokenIssuer,
    failure_limiter: KeyedRateLimiter,
}

impl<C, R> RequestGate<C, R>
where
    C: CredentialStore,
    R: RevocationStore,
{
    #[must_use]
    pub fn new(
        credentials: Arc<C>,
        revocation: RevocationRegistry<R>,
        issuer: TokenIssuer,
    ) -> Self {
        Self {
            credentials,
            revocation,
            issuer,
            failure_limiter: KeyedRateLimiter::new(RateLimitPolicy::request_gate()),
        }
    }

    #[must_use]
    pub fn with_failure_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.failure_limiter = KeyedRateLimiter::new(policy);
        self
    }

    /// Authorize a bearer token, producing the caller's [`Principal`].
    ///
    /// Only failures count against the per-IP limiter; a client
    /// presenting valid tokens is never throttled here. When the
    /// limiter trips, its error replaces the underlying one so the
    /// prober stops learning which tokens are merely expired.
    pub async fn authorize(&self, token: &str, ip: Option<&str>) -> Result<Principal> {
        match self.check(token).await {
            Ok(principal) => Ok(principal),
            Err(err) => {
                if let Some(ip) = ip {
                    self.failure_limiter.consume(ip)?;
                }
                Err(err)
            }
        }
    }

    async fn check(&self, token: &str) -> Result<Principal> {
        let claims = self.issuer.verify_access(token)?;

        if self.revocation.is_revoked(&claims.jti).await? {
            tracing::warn!(
                target: "auth.gate.revoked_token",
                user_id = %claims.sub,
                token_id = %claims.jti,
                "Revoked access token presented"
            );
            return Err(AuthError::TokenInvalid);
        }

        let record = retry_read(|| self.credentials.find_by_id(&claims.sub))
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if claims.superseded_by(record.password_changed_at) {
            tracing::info!(
                target: "auth.gate.superseded_token",
                user_id = %claims.sub,
                "Access token predates password change"
            );
            return Err(AuthError::TokenSuperseded);
        }

        // Enabling MFA invalidates the standing of pre-MFA tokens.
        if record.mfa_enabled && !claims.mfa_verified {
            return Err(AuthError::MfaRequired);
        }

        let expires_at = claims.expires_at();
        Ok(Principal {
            user_id: record.id,
            email: record.email,
            mfa_verified: claims.mfa_verified,
            token_id: claims.jti,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revocation::test::InMemoryRevocationStore;
    use crate::storage::test::InMemoryCredentialStore;
    use crate::storage::NewCredential;
    use crate::token::TokenIssuerConfig;
    use std::time::Duration;

    struct Fixture {
        credentials: Arc<InMemoryCredentialStore>,
        revocation: RevocationRegistry<InMemoryRevocationStore>,
        issuer: TokenIssuer,
        gate: RequestGate<InMemoryCredentialStore, InMemoryRevocationStore>,
        user_id: String,
    }

    async fn fixture() -> Fixture {
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let revocation_store = Arc::new(InMemoryRevocationStore::new());
        let issuer = TokenIssuer::new(TokenIssuerConfig::with_secret("test", b"secret"));

        let record = credentials
            .create(NewCredential {
                email: "user@example.com".into(),
                password_hash: "$argon2id$stub".into(),
            })
            .await
            .unwrap();

        let gate = RequestGate::new(
            credentials.clone(),
            RevocationRegistry::new(revocation_store.clone()),
            issuer.clone(),
        );
        Fixture {
            credentials,
            revocation: RevocationRegistry::new(revocation_store),
            issuer,
            gate,
            user_id: record.id,
        }
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(extract_bearer("Bearer   spaced  "), Some("spaced"));
        assert_eq!(extract_bearer("Basic dXNlcg=="), None);
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("bearer abc"), None);
    }

    #[tokio::test]
    async fn test_valid_token_yields_principal() {
        let f = fixture().await;
        let token = f.issuer.issue_access(&f.user_id, false).unwrap();

        let principal = f.gate.authorize(&token, None).await.unwrap();
        assert_eq!(principal.user_id, f.user_id);
        assert_eq!(principal.email, "user@example.com");
        assert!(!principal.mfa_verified);
        assert!(principal.expires_at > SystemTime::now());
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let f = fixture().await;
        let token = f.issuer.issue_access(&f.user_id, false).unwrap();
        let claims = f.issuer.verify_access(&token).unwrap();
        f.revocation.revoke_access_token(&claims).await.unwrap();

        let err = f.gate.authorize(&token, None).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn test_token_for_deleted_account_rejected() {
        let f = fixture().await;
        let token = f.issuer.issue_access("no-such-user", false).unwrap();
        let err = f.gate.authorize(&token, None).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn test_password_change_supersedes_older_tokens() {
        let f = fixture().await;
        let token = f.issuer.issue_access(&f.user_id, false).unwrap();

        // A change strictly after issuance, at second resolution.
        f.credentials
            .update_password(
                &f.user_id,
                "$argon2id$new",
                SystemTime::now() + Duration::from_secs(2),
            )
            .await
            .unwrap();

        let err = f.gate.authorize(&token, None).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenSuperseded));
    }

    #[tokio::test]
    async fn test_enabling_mfa_demotes_pre_mfa_tokens() {
        let f = fixture().await;
        let token = f.issuer.issue_access(&f.user_id, false).unwrap();
        f.credentials
            .enable_mfa(&f.user_id, "SECRET", vec![])
            .await
            .unwrap();

        let err = f.gate.authorize(&token, None).await.unwrap_err();
        assert!(matches!(err, AuthError::MfaRequired));

        // A token that carries the MFA claim still passes.
        let verified = f.issuer.issue_access(&f.user_id, true).unwrap();
        assert!(f.gate.authorize(&verified, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_repeated_failures_trip_the_limiter() {
        let f = fixture().await;
        let gate = f
            .gate
            .with_failure_limit(RateLimitPolicy::new(3, Duration::from_secs(60)));

        for _ in 0..3 {
            let err = gate
                .authorize("not.a.token", Some("10.9.8.7"))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::TokenInvalid));
        }
        let err = gate
            .authorize("not.a.token", Some("10.9.8.7"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_successes_never_count_against_limiter() {
        let f = fixture().await;
        let gate = f
            .gate
            .with_failure_limit(RateLimitPolicy::new(2, Duration::from_secs(60)));
        let token = f.issuer.issue_access(&f.user_id, false).unwrap();

        for _ in 0..10 {
            gate.authorize(&token, Some("10.9.8.7")).await.unwrap();
        }
    }
}
