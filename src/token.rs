//! Signed access and refresh token issuance and verification.
//!
//! Access tokens are short-lived and carry `mfa_verified`; refresh
//! tokens are long-lived and carry the `session_id` binding them to a
//! session lineage. Verification tolerates 30 seconds of clock skew by
//! default. The issuer is pure CPU work: it holds key material only
//! and never touches a store, so the `password_changed_at`
//! supersession check is a claims helper the request gate applies
//! after loading the credential record.

use crate::error::{AuthError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default access token lifetime.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Refresh lifetime when the caller asked to be remembered.
pub const DEFAULT_REMEMBER_ME_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default clock-skew tolerance for verification.
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

/// Discriminates the two token kinds so one can never stand in for
/// the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by an access token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: String,
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Issued-at, unix seconds.
    pub iat: u64,
    /// Expiry, unix seconds.
    pub exp: u64,
    /// Token id, used as the revocation-registry key.
    pub jti: String,
    pub token_type: TokenKind,
    /// Whether this token was issued after MFA completed.
    pub mfa_verified: bool,
}

impl AccessClaims {
    /// Whether a password change at `changed_at` supersedes this
    /// token. Strictly-after comparison at second resolution, so the
    /// token issued by the change itself stays valid.
    #[must_use]
    pub fn superseded_by(&self, changed_at: SystemTime) -> bool {
        unix_secs(changed_at) > self.iat
    }

    /// Remaining lifetime from `now`, for revocation-entry TTLs.
    #[must_use]
    pub fn remaining_lifetime(&self, now: SystemTime) -> Duration {
        Duration::from_secs(self.exp.saturating_sub(unix_secs(now)))
    }

    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.exp)
    }
}

/// Claims carried by a refresh token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
    pub token_type: TokenKind,
    /// The session lineage this token belongs to.
    pub session_id: String,
}

/// A freshly issued access + refresh token pair.
#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Key material and lifetimes for the issuer.
#[derive(Clone)]
pub struct TokenIssuerConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: Option<String>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    remember_me_ttl: Duration,
    leeway_secs: u64,
}

impl TokenIssuerConfig {
    /// Symmetric HS256 configuration.
    #[must_use]
    pub fn with_secret(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            issuer: issuer.into(),
            audience: None,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            remember_me_ttl: DEFAULT_REMEMBER_ME_TTL,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }

    /// Asymmetric RS256 configuration from PEM-encoded keys.
    pub fn with_rsa_pem(
        issuer: impl Into<String>,
        private_pem: &[u8],
        public_pem: &[u8],
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("invalid RSA private key: {e}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("invalid RSA public key: {e}")))?;
        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm: Algorithm::RS256,
            issuer: issuer.into(),
            audience: None,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            remember_me_ttl: DEFAULT_REMEMBER_ME_TTL,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        })
    }

    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[must_use]
    pub fn access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn remember_me_ttl(mut self, ttl: Duration) -> Self {
        self.remember_me_ttl = ttl;
        self
    }

    #[must_use]
    pub fn leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }
}

/// Mints and verifies signed tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    config: TokenIssuerConfig,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: TokenIssuerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.config.access_ttl
    }

    /// Issue a short-lived access token.
    pub fn issue_access(&self, user_id: &str, mfa_verified: bool) -> Result<String> {
        let now = unix_secs(SystemTime::now());
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now,
            exp: now + self.config.access_ttl.as_secs(),
            jti: generate_token_id(),
            token_type: TokenKind::Access,
            mfa_verified,
        };
        self.encode(&claims)
    }

    /// Issue a long-lived refresh token bound to a session.
    pub fn issue_refresh(
        &self,
        user_id: &str,
        session_id: &str,
        remember_me: bool,
    ) -> Result<String> {
        let ttl = if remember_me {
            self.config.remember_me_ttl
        } else {
            self.config.refresh_ttl
        };
        let now = unix_secs(SystemTime::now());
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now,
            exp: now + ttl.as_secs(),
            jti: generate_token_id(),
            token_type: TokenKind::Refresh,
            session_id: session_id.to_string(),
        };
        self.encode(&claims)
    }

    /// Issue both tokens for a session in one call.
    pub fn issue_pair(
        &self,
        user_id: &str,
        session_id: &str,
        mfa_verified: bool,
        remember_me: bool,
    ) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access(user_id, mfa_verified)?,
            refresh_token: self.issue_refresh(user_id, session_id, remember_me)?,
            expires_in: self.config.access_ttl.as_secs(),
        })
    }

    /// Verify an access token's signature and lifetime.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        let claims: AccessClaims = self.decode(token)?;
        if claims.token_type != TokenKind::Access {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }

    /// Verify a refresh token's signature and lifetime.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
        let claims: RefreshClaims = self.decode(token)?;
        if claims.token_type != TokenKind::Refresh {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }

    fn encode<T: Serialize>(&self, claims: &T) -> Result<String> {
        jsonwebtoken::encode(
            &Header::new(self.config.algorithm),
            claims,
            &self.config.encoding_key,
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("token encoding: {e}")))
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T> {
        let mut validation = Validation::new(self.config.algorithm);
        validation.leeway = self.config.leeway_secs;
        validation.set_issuer(&[&self.config.issuer]);
        match &self.config.audience {
            Some(aud) => validation.set_audience(&[aud]),
            // Without an expected audience there is nothing to check.
            None => validation.validate_aud = false,
        }

        jsonwebtoken::decode::<T>(token, &self.config.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            })
    }
}

/// Random 128-bit token id, URL-safe.
fn generate_token_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
