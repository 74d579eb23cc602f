//! Password hashing with Argon2id.
//!
//! Digests embed their own salt and cost parameters (PHC string
//! format), so verification needs no side table and parameter upgrades
//! can be detected per-digest via [`PasswordHasher::needs_rehash`].

use crate::error::{AuthError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::OnceLock;

/// Cost parameters for Argon2id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of iterations.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        // OWASP-recommended Argon2id parameters
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl PasswordConfig {
    /// Weak parameters for tests. Never use in production.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// One-way adaptive password hasher.
#[derive(Clone, Debug, Default)]
pub struct PasswordHasher {
    config: PasswordConfig,
}

static DUMMY_DIGEST: OnceLock<String> = OnceLock::new();

impl PasswordHasher {
    #[must_use]
    pub fn new(config: PasswordConfig) -> Self {
        Self { config }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.config.memory_kib,
            self.config.iterations,
            self.config.parallelism,
            None,
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hash a plaintext password with a fresh random salt.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = argon2::PasswordHasher::hash_password(
            &self.argon2()?,
            plaintext.as_bytes(),
            &salt,
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("password hashing: {e}")))?;
        Ok(digest.to_string())
    }

    /// Verify a plaintext password against a stored digest.
    ///
    /// Returns `false` for a malformed digest rather than erroring, so
    /// a corrupted record behaves like a wrong password.
    pub fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burn a hash-verification cycle against a static digest.
    ///
    /// Called on login for unknown emails so the miss path costs the
    /// same as a real verification and does not leak account existence
    /// through timing.
    pub fn dummy_verify(&self, plaintext: &str) {
        let digest = DUMMY_DIGEST.get_or_init(|| {
            self.hash("correct horse battery staple")
                .unwrap_or_default()
        });
        let _ = self.verify(plaintext, digest);
    }

    /// Whether a stored digest was produced with weaker parameters
    /// than currently configured and should be transparently upgraded
    /// on the next successful login.
    pub fn needs_rehash(&self, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return true;
        };
        let get = |key: &str| {
            parsed
                .params
                .get_str(key)
                .and_then(|v| v.parse::<u32>().ok())
        };
        match (get("m"), get("t"), get("p")) {
            (Some(m), Some(t), Some(p)) => {
                m < self.config.memory_kib
                    || t < self.config.iterations
                    || p < self.config.parallelism
            }
            _ => true,
        }
    }
}
