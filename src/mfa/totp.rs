//! Time-based one-time password verification.
//!
//! Standard TOTP: SHA-1, 6 digits, 30-second step, with one step of
//! skew tolerance in each direction for clock drift. Verification is
//! infallible from the caller's view: any malformed secret or code
//! simply fails to verify.

use crate::error::{AuthError, Result};
use totp_rs::{Algorithm, Secret, TOTP};

/// TOTP parameters.
#[derive(Clone, Debug)]
pub struct TotpConfig {
    /// Issuer shown in authenticator apps.
    pub issuer: String,
    /// Code length.
    pub digits: usize,
    /// Step length in seconds.
    pub step: u64,
    /// Steps of drift tolerance on each side.
    pub skew: u8,
}

impl TotpConfig {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            digits: 6,
            step: 30,
            skew: 1,
        }
    }
}

/// Result of enrolling an account in TOTP.
#[derive(Clone)]
pub struct TotpEnrollment {
    /// Base32-encoded shared secret, to be persisted on the
    /// credential record.
    pub secret: String,
    /// otpauth:// provisioning URI for authenticator apps.
    pub otpauth_url: String,
}

// The secret must not end up in logs via Debug.
impl std::fmt::Debug for TotpEnrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpEnrollment")
            .field("secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Generates enrollments and verifies one-time codes.
#[derive(Clone, Debug)]
pub struct TotpVerifier {
    config: TotpConfig,
}

impl TotpVerifier {
    #[must_use]
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    fn build(&self, secret: &str, account: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("invalid TOTP secret: {e:?}")))?;
        TOTP::new(
            Algorithm::SHA1,
            self.config.digits,
            self.config.skew,
            self.config.step,
            secret_bytes,
            Some(self.config.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP construction: {e}")))
    }

    /// Generate a fresh secret and provisioning URI for an account.
    pub fn enroll(&self, account: &str) -> Result<TotpEnrollment> {
        let secret = Secret::generate_secret();
        let encoded = secret.to_encoded().to_string();
        let totp = self.build(&encoded, account)?;
        Ok(TotpEnrollment {
            secret: encoded,
            otpauth_url: totp.get_url(),
        })
    }

    /// Verify a candidate code against a stored secret.
    ///
    /// Input is normalized (spaces and dashes stripped); any parse or
    /// construction failure verifies as `false`.
    #[must_use]
    pub fn verify(&self, secret: &str, candidate: &str) -> bool {
        let code: String = candidate
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        if code.len() != self.config.digits || !code.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        let Ok(totp) = self.build(secret, "verify") else {
            return false;
        };
        totp.check_current(&code).unwrap_or(false)
    }

    /// Current code for a secret. Test helper only.
    #[cfg(any(test, feature = "test-stores"))]
    pub fn current_code(&self, secret: &str) -> Result<String> {
        let totp = self.build(secret, "test")?;
        totp.generate_current()
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("TOTP generation: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TotpVerifier {
        TotpVerifier::new(TotpConfig::new("portcullis-test"))
    }

    #[test]
    fn test_enrollment_produces_usable_secret() {
        let verifier = verifier();
        let enrollment = verifier.enroll("user@example.com").unwrap();

        assert!(!enrollment.secret.is_empty());
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        assert!(enrollment.otpauth_url.contains("portcullis-test"));

        let code = verifier.current_code(&enrollment.secret).unwrap();
        assert!(verifier.verify(&enrollment.secret, &code));
    }

    #[test]
    fn test_wrong_code_fails() {
        let verifier = verifier();
        let enrollment = verifier.enroll("user@example.com").unwrap();

        let code = verifier.current_code(&enrollment.secret).unwrap();
        // Flip one digit.
        let wrong: String = code
            .chars()
            .enumerate()
            .map(|(i, c)| if i == 0 { if c == '9' { '0' } else { '9' } } else { c })
            .collect();
        assert!(!verifier.verify(&enrollment.secret, &wrong));
    }

    #[test]
    fn test_input_normalization() {
        let verifier = verifier();
        let enrollment = verifier.enroll("user@example.com").unwrap();
        let code = verifier.current_code(&enrollment.secret).unwrap();

        let spaced = format!("{} {}", &code[..3], &code[3..]);
        assert!(verifier.verify(&enrollment.secret, &spaced));
        let dashed = format!("{}-{}", &code[..3], &code[3..]);
        assert!(verifier.verify(&enrollment.secret, &dashed));
    }

    #[test]
    fn test_malformed_inputs_fail_closed() {
        let verifier = verifier();
        let enrollment = verifier.enroll("user@example.com").unwrap();

        assert!(!verifier.verify(&enrollment.secret, ""));
        assert!(!verifier.verify(&enrollment.secret, "12345"));
        assert!(!verifier.verify(&enrollment.secret, "abcdef"));
        assert!(!verifier.verify("not-base32!!", "123456"));
    }

    #[test]
    fn test_secret_redacted_in_debug() {
        let enrollment = verifier().enroll("user@example.com").unwrap();
        let debug = format!("{enrollment:?}");
        assert!(!debug.contains(&enrollment.secret));
    }
}
