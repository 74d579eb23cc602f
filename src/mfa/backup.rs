//! Single-use backup codes for account recovery.

use subtle::ConstantTimeEq;

/// A freshly generated set of backup codes.
///
/// Handed to the user exactly once at enrollment; what gets persisted
/// is the store's concern (hashed, ideally).
#[derive(Clone)]
pub struct BackupCodeSet {
    pub codes: Vec<String>,
}

impl BackupCodeSet {
    /// Codes grouped for readability (`ABCD-2345`).
    #[must_use]
    pub fn display_codes(&self) -> Vec<String> {
        self.codes
            .iter()
            .map(|c| {
                if c.len() >= 8 {
                    format!("{}-{}", &c[..4], &c[4..])
                } else {
                    c.clone()
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for BackupCodeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCodeSet")
            .field("count", &self.codes.len())
            .finish_non_exhaustive()
    }
}

/// Generates and verifies backup codes.
#[derive(Clone, Debug)]
pub struct BackupCodeGenerator {
    /// Codes per set.
    pub count: usize,
    /// Characters per code.
    pub length: usize,
}

impl Default for BackupCodeGenerator {
    fn default() -> Self {
        Self {
            count: 10,
            length: 8,
        }
    }
}

impl BackupCodeGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Generate a new set of codes.
    #[must_use]
    pub fn generate(&self) -> BackupCodeSet {
        use rand::Rng;

        // No 0, O, 1, I to avoid transcription mistakes.
        const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

        let mut rng = rand::rngs::OsRng;
        let codes = (0..self.count)
            .map(|_| {
                (0..self.length)
                    .map(|_| {
                        let idx = rng.gen_range(0..CHARSET.len());
                        CHARSET[idx] as char
                    })
                    .collect()
            })
            .collect();

        BackupCodeSet { codes }
    }

    /// Match a candidate against the remaining valid codes.
    ///
    /// Returns the index of the match so the caller can remove it
    /// atomically with use; a consumed code must never verify twice.
    #[must_use]
    pub fn verify(candidate: &str, valid_codes: &[String]) -> Option<usize> {
        let normalized = candidate.replace('-', "").replace(' ', "").to_uppercase();

        valid_codes
            .iter()
            .position(|c| bool::from(c.as_bytes().ct_eq(normalized.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_default_set() {
        let codes = BackupCodeGenerator::new().generate();
        assert_eq!(codes.codes.len(), 10);
        assert!(codes.codes.iter().all(|c| c.len() == 8));
        // No ambiguous characters.
        assert!(codes
            .codes
            .iter()
            .all(|c| !c.contains(['0', 'O', '1', 'I'])));
    }

    #[test]
    fn test_verify_returns_matching_index() {
        let codes = BackupCodeGenerator::new().generate();
        assert_eq!(
            BackupCodeGenerator::verify(&codes.codes[3], &codes.codes),
            Some(3)
        );
        assert_eq!(BackupCodeGenerator::verify("WRONG234", &codes.codes), None);
    }

    #[test]
    fn test_verify_normalizes_input() {
        let codes = BackupCodeGenerator::new().generate();
        let dashed = format!("{}-{}", &codes.codes[0][..4], &codes.codes[0][4..]);
        assert_eq!(BackupCodeGenerator::verify(&dashed, &codes.codes), Some(0));

        let lowercase = codes.codes[0].to_lowercase();
        assert_eq!(
            BackupCodeGenerator::verify(&lowercase, &codes.codes),
            Some(0)
        );
    }

    #[test]
    fn test_consumed_code_no_longer_verifies() {
        let mut codes = BackupCodeGenerator::new().generate().codes;
        let used = codes[0].clone();

        let index = BackupCodeGenerator::verify(&used, &codes).unwrap();
        codes.remove(index);

        assert_eq!(BackupCodeGenerator::verify(&used, &codes), None);
        assert_eq!(codes.len(), 9);
    }

    #[test]
    fn test_display_grouping() {
        let set = BackupCodeSet {
            codes: vec!["ABCD2345".to_string()],
        };
        assert_eq!(set.display_codes(), vec!["ABCD-2345"]);
    }

    #[test]
    fn test_custom_settings() {
        let codes = BackupCodeGenerator::new()
            .with_count(5)
            .with_length(10)
            .generate();
        assert_eq!(codes.codes.len(), 5);
        assert!(codes.codes.iter().all(|c| c.len() == 10));
    }

    #[test]
    fn test_debug_hides_codes() {
        let set = BackupCodeGenerator::new().generate();
        let debug = format!("{set:?}");
        assert!(!debug.contains(&set.codes[0]));
    }
}
