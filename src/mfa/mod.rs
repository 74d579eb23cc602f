//! Multi-factor verification: TOTP codes and single-use backup codes.

pub mod backup;
pub mod totp;

pub use backup::{BackupCodeGenerator, BackupCodeSet};
pub use totp::{TotpConfig, TotpEnrollment, TotpVerifier};
