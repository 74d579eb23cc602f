//! Logout: retire the access token and the session behind it.
//!
//! Logout is idempotent and forgiving. An expired access token still
//! logs out cleanly (there is nothing left to revoke), and a bad
//! refresh token is ignored rather than failing the call: the user is
//! leaving, not authenticating.
//!
//! # Tracing Events
//!
//! - `auth.logout.success` - Single-session logout
//! - `auth.logout.all` - Every session for the user revoked

use crate::error::{AuthError, Result};
use crate::revocation::{RevocationRegistry, RevocationStore};
use crate::sessions::{SessionManager, SessionStore};
use crate::token::TokenIssuer;
use std::sync::Arc;

/// The logout operations.
pub struct LogoutFlow<S, R>
where
    S: SessionStore,
    R: RevocationStore,
{
    sessions: Arc<SessionManager<S>>,
    revocation: RevocationRegistry<R>,
    issuer: TokenIssuer,
}

impl<S, R> LogoutFlow<S, R>
where
    S: SessionStore,
    R: RevocationStore,
{
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager<S>>,
        revocation: RevocationRegistry<R>,
        issuer: TokenIssuer,
    ) -> Self {
        Self {
            sessions,
            revocation,
            issuer,
        }
    }

    /// End one session: blacklist the access token for its remaining
    /// lifetime and revoke the refresh session if one was presented.
    pub async fn logout(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let user_id = match self.issuer.verify_access(access_token) {
            Ok(claims) => {
                self.revocation.revoke_access_token(&claims).await?;
                Some(claims.sub)
            }
            // Expired means already unusable; nothing to blacklist.
            Err(AuthError::TokenExpired) => None,
            Err(err) => return Err(err),
        };

        if let Some(refresh_token) = refresh_token {
            // Best effort: a garbled or foreign refresh token does not
            // block the logout, it just leaves no session to revoke.
            if let Ok(claims) = self.issuer.verify_refresh(refresh_token) {
                self.sessions.revoke(&claims.session_id).await?;
            }
        }

        tracing::info!(
            target: "auth.logout.success",
            user_id = user_id.as_deref().unwrap_or("unknown"),
            "Logged out"
        );
        Ok(())
    }

    /// End every session the user has, blacklisting the presented
    /// access token as well. Requires a live access token: this is a
    /// security action, not a courtesy cleanup.
    pub async fn logout_all(&self, access_token: &str) -> Result<usize> {
        let claims = self.issuer.verify_access(access_token)?;
        self.revocation.revoke_access_token(&claims).await?;
        let count = self.sessions.revoke_all(&claims.sub).await?;

        tracing::info!(
            target: "auth.logout.all",
            user_id = %claims.sub,
            sessions_revoked = count,
            "Logged out everywhere"
        );
        Ok(count)
    }
}
