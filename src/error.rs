//! Error taxonomy for the authentication core.
//!
//! Every fallible operation in this crate returns [`AuthError`]. The
//! variants are semantic outcomes, not transport codes: the embedding
//! HTTP layer decides how each maps to a status. The one property this
//! module does enforce is outward indistinguishability of credential
//! and MFA failures (see [`AuthError::safe_message`]).

/// The error type for all authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Wrong email or password. Deliberately carries no detail about
    /// which part failed.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Signup with an email that already has a credential record.
    #[error("email already registered")]
    EmailTaken,

    /// The account is temporarily locked after repeated failures.
    #[error("account locked, retry in {retry_after_secs}s")]
    AccountLocked {
        /// Seconds until the lock window elapses.
        retry_after_secs: u64,
    },

    /// The account has MFA enabled and no (or no valid) code context
    /// was supplied yet.
    #[error("multi-factor code required")]
    MfaRequired,

    /// The supplied one-time or backup code did not verify.
    #[error("invalid multi-factor code")]
    MfaInvalid,

    /// The token's lifetime has elapsed (beyond clock-skew tolerance).
    #[error("token expired")]
    TokenExpired,

    /// Signature, structure, or claim validation failed.
    #[error("token invalid")]
    TokenInvalid,

    /// The token was issued before the account's password last changed.
    #[error("token superseded by password change")]
    TokenSuperseded,

    /// An already-rotated refresh token was presented again.
    #[error("refresh token replay detected")]
    SessionReplay,

    /// No active session matches the presented refresh token.
    #[error("session not found")]
    SessionNotFound,

    /// A rate-limit policy rejected the call.
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the limiter admits this key again.
        retry_after_secs: u64,
    },

    /// The reset code exists but its window has elapsed.
    #[error("reset code expired")]
    ResetCodeExpired,

    /// The reset code is unknown or was already redeemed.
    #[error("reset code invalid")]
    ResetCodeInvalid,

    /// A backing store call failed transiently (timeout, connection
    /// loss). Retryable per the propagation policy.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unexpected internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn account_locked(retry_after_secs: u64) -> Self {
        Self::AccountLocked { retry_after_secs }
    }

    /// Whether the caller may retry the same call and expect it to
    /// succeed. True only for transient store failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Message suitable for returning to an untrusted caller.
    ///
    /// Credential and MFA failures share one string so that the
    /// response body cannot be used to confirm an account exists or
    /// that a password was correct. Internal details are never
    /// exposed; they go to the server log only.
    pub fn safe_message(&self) -> String {
        match self {
            Self::InvalidCredentials | Self::MfaInvalid => {
                "invalid credentials".to_string()
            }
            Self::EmailTaken => "email already registered".to_string(),
            Self::AccountLocked { retry_after_secs } => {
                format!("account locked, retry in {retry_after_secs}s")
            }
            Self::MfaRequired => "multi-factor code required".to_string(),
            Self::TokenExpired => "token expired".to_string(),
            Self::TokenInvalid | Self::TokenSuperseded | Self::SessionReplay => {
                "token invalid".to_string()
            }
            Self::SessionNotFound => "session not found".to_string(),
            Self::RateLimited { retry_after_secs } => {
                format!("rate limited, retry in {retry_after_secs}s")
            }
            Self::ResetCodeExpired => "reset code expired".to_string(),
            Self::ResetCodeInvalid => "reset code invalid".to_string(),
            Self::StoreUnavailable(_) => "service temporarily unavailable".to_string(),
            Self::Internal(_) => "internal error".to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;
