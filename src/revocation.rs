//! Revocation registry for access tokens revoked before expiry.
//!
//! Logout places the token's id (`jti`) here with a TTL equal to the
//! token's remaining lifetime; once the token would have expired
//! anyway, the entry is dead weight and lapses. The registry is the
//! request gate's second check, after signature verification.
//!
//! # Tracing Events
//!
//! - `auth.token.revoked` - Access token explicitly revoked

use crate::error::Result;
use crate::token::AccessClaims;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// TTL-expiring blacklist of token ids.
///
/// Backed in production by any key-value store with TTL support
/// (e.g. Redis `SET key 1 EX remaining`). Lookups must be safe under
/// concurrent revoke + check; last-writer-wins on the TTL is fine.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Mark a token id revoked for `ttl`.
    async fn revoke(&self, token_id: &str, ttl: Duration) -> Result<()>;

    /// Whether a token id is currently revoked.
    async fn is_revoked(&self, token_id: &str) -> Result<bool>;
}

/// Wraps a [`RevocationStore`] with lifetime math and tracing.
pub struct RevocationRegistry<R: RevocationStore> {
    store: std::sync::Arc<R>,
}

impl<R: RevocationStore> RevocationRegistry<R> {
    #[must_use]
    pub fn new(store: std::sync::Arc<R>) -> Self {
        Self { store }
    }

    /// Revoke the access token described by `claims`.
    ///
    /// The entry lives exactly as long as the token had left; an
    /// already-expired token needs no entry at all.
    pub async fn revoke_access_token(&self, claims: &AccessClaims) -> Result<()> {
        let remaining = claims.remaining_lifetime(SystemTime::now());
        if remaining.is_zero() {
            return Ok(());
        }
        self.store.revoke(&claims.jti, remaining).await?;

        tracing::info!(
            target: "auth.token.revoked",
            user_id = %claims.sub,
            token_id = %claims.jti,
            ttl_secs = remaining.as_secs(),
            "Access token revoked"
        );
        Ok(())
    }

    pub async fn is_revoked(&self, token_id: &str) -> Result<bool> {
        self.store.is_revoked(token_id).await
    }
}

/// In-memory implementation with lazy expiry.
#[cfg(any(test, feature = "test-stores"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::time::Instant;

    /// Sweep dead entries every N writes so the map stays bounded.
    const SWEEP_INTERVAL: u64 = 256;

    /// In-memory TTL blacklist.
    #[derive(Default)]
    pub struct InMemoryRevocationStore {
        entries: RwLock<HashMap<String, Instant>>,
        writes: std::sync::atomic::AtomicU64,
    }

    impl InMemoryRevocationStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.entries.read().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl RevocationStore for InMemoryRevocationStore {
        async fn revoke(&self, token_id: &str, ttl: Duration) -> Result<()> {
            use std::sync::atomic::Ordering;

            let mut entries = self.entries.write().unwrap();
            let count = self.writes.fetch_add(1, Ordering::Relaxed);
            if count % SWEEP_INTERVAL == 0 && count > 0 {
                let now = Instant::now();
                entries.retain(|_, expires| *expires > now);
            }
            entries.insert(token_id.to_string(), Instant::now() + ttl);
            Ok(())
        }

        async fn is_revoked(&self, token_id: &str) -> Result<bool> {
            let entries = self.entries.read().unwrap();
            Ok(entries
                .get(token_id)
                .is_some_and(|expires| *expires > Instant::now()))
        }
    }

}
