//! Portcullis - An authentication and session-lifecycle core
//!
//! Portcullis implements the security-sensitive middle of an auth
//! system: Argon2id password hashing, persistent brute-force lockout,
//! JWT access/refresh issuance with rotation and replay detection,
//! token revocation, TOTP and backup-code MFA, keyed rate limiting,
//! and time-boxed password reset. Storage is pluggable through the
//! [`storage::CredentialStore`], [`sessions::SessionStore`], and
//! [`revocation::RevocationStore`] traits; the HTTP layer on top is
//! yours.
//!
//! # Quick Start
//!
//! ```rust
//! use portcullis::password::{PasswordConfig, PasswordHasher};
//! use portcullis::token::{TokenIssuer, TokenIssuerConfig};
//!
//! # fn main() -> portcullis::Result<()> {
//! // Hash a password for storage.
//! let hasher = PasswordHasher::new(PasswordConfig::default());
//! let digest = hasher.hash("hunter2!")?;
//! assert!(hasher.verify("hunter2!", &digest));
//!
//! // Mint and verify a token pair bound to a session.
//! let issuer = TokenIssuer::new(TokenIssuerConfig::with_secret("my-app", b"signing-secret"));
//! let pair = issuer.issue_pair("user-42", "session-7", false, false)?;
//! let claims = issuer.verify_access(&pair.access_token)?;
//! assert_eq!(claims.sub, "user-42");
//! # Ok(())
//! # }
//! ```
//!
//! The flows in [`flows`] and [`reset`] wire these pieces together with
//! the lockout machine, session manager, revocation registry, and rate
//! limiter; hand them your store implementations and call the five
//! operations.

mod error;
pub mod flows;
pub mod lockout;
pub mod mfa;
pub mod password;
pub mod ratelimit;
pub mod reset;
pub mod revocation;
pub mod sessions;
pub mod storage;
pub mod token;

// Re-exports for public API
pub use error::{AuthError, Result};
pub use flows::{
    extract_bearer, AuthSuccess, LoginFlow, LoginRequest, LogoutFlow, Principal, RefreshFlow,
    RequestGate, SignupFlow, SignupRequest,
};
pub use lockout::{LockoutManager, LockoutPolicy, LockoutState};
pub use password::{PasswordConfig, PasswordHasher};
pub use ratelimit::{KeyedRateLimiter, RateLimitPolicy};
pub use reset::{PasswordResetFlow, ResetNotifier};
pub use revocation::{RevocationRegistry, RevocationStore};
pub use sessions::{DeviceFingerprint, SessionManager, SessionRecord, SessionStore};
pub use storage::{CredentialRecord, CredentialStore, NewCredential};
pub use token::{AccessClaims, RefreshClaims, TokenIssuer, TokenIssuerConfig, TokenPair};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main()
/// before wiring up the flows.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "portcullis=debug")
/// - `PORTCULLIS_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("PORTCULLIS_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing with an explicit filter directive
pub fn init_tracing_with_filter(directive: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(directive))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
