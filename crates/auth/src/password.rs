//! Password policy, hashing and verification.
//!
//! Hashing uses Argon2id with a configurable work factor. `validate` and
//! `verify` never fail: they return structured violations / `false`.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("invalid hash cost parameters: {0}")]
    InvalidCost(String),
}

/// Configurable password policy. Any rule may be disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special_chars: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_special_chars: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PolicyViolation {
    TooShort { min_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingNumber,
    MissingSpecialChar,
}

impl core::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooShort { min_length } => {
                write!(f, "password must be at least {min_length} characters long")
            }
            Self::MissingUppercase => f.write_str("password must contain an uppercase letter"),
            Self::MissingLowercase => f.write_str("password must contain a lowercase letter"),
            Self::MissingNumber => f.write_str("password must contain a number"),
            Self::MissingSpecialChar => f.write_str("password must contain a special character"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<PolicyViolation>,
}

impl PasswordPolicy {
    pub fn validate(&self, plaintext: &str) -> ValidationResult {
        let mut violations = Vec::new();

        if plaintext.chars().count() < self.min_length {
            violations.push(PolicyViolation::TooShort {
                min_length: self.min_length,
            });
        }
        if self.require_uppercase && !plaintext.chars().any(|c| c.is_uppercase()) {
            violations.push(PolicyViolation::MissingUppercase);
        }
        if self.require_lowercase && !plaintext.chars().any(|c| c.is_lowercase()) {
            violations.push(PolicyViolation::MissingLowercase);
        }
        if self.require_numbers && !plaintext.chars().any(|c| c.is_numeric()) {
            violations.push(PolicyViolation::MissingNumber);
        }
        if self.require_special_chars
            && !plaintext
                .chars()
                .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
        {
            violations.push(PolicyViolation::MissingSpecialChar);
        }

        ValidationResult {
            valid: violations.is_empty(),
            violations,
        }
    }
}

/// Argon2 work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Password hashing service. The work factor is fixed at construction.
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn new(cost: HashCost) -> Result<Self, PasswordError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| PasswordError::InvalidCost(e.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash with a fresh random salt (PHC string format).
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Constant-time verification. Malformed hashes verify as `false`.
    pub fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };

        self.argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

impl core::fmt::Debug for PasswordService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PasswordService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cheap() -> PasswordService {
        PasswordService::new(HashCost {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn hash_then_verify() {
        let service = cheap();
        let hash = service.hash("Correct-Horse-9").unwrap();

        assert!(service.verify("Correct-Horse-9", &hash));
        assert!(!service.verify("correct-horse-9", &hash));
    }

    #[test]
    fn hashes_are_salted() {
        let service = cheap();
        assert_ne!(service.hash("Same-Pass-1").unwrap(), service.hash("Same-Pass-1").unwrap());
    }

    #[test]
    fn malformed_hash_verifies_false() {
        let service = cheap();
        assert!(!service.verify("anything", "not-a-phc-string"));
        assert!(!service.verify("anything", ""));
    }

    #[test]
    fn invalid_cost_is_rejected() {
        let result = PasswordService::new(HashCost {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        });
        assert!(matches!(result, Err(PasswordError::InvalidCost(_))));
    }

    #[test]
    fn default_policy_reports_every_violation() {
        let policy = PasswordPolicy::default();

        assert!(policy.validate("ValidPass123").valid);

        let result = policy.validate("short");
        assert!(!result.valid);
        assert!(result.violations.contains(&PolicyViolation::TooShort { min_length: 8 }));
        assert!(result.violations.contains(&PolicyViolation::MissingUppercase));
        assert!(result.violations.contains(&PolicyViolation::MissingNumber));
        assert!(!result.violations.contains(&PolicyViolation::MissingLowercase));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let policy = PasswordPolicy {
            min_length: 4,
            require_uppercase: false,
            require_lowercase: false,
            require_numbers: false,
            require_special_chars: true,
        };

        assert!(!policy.validate("abcd").valid);
        assert!(policy.validate("ab!d").valid);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn verify_round_trips(body in "[a-z]{6,20}", other in "[a-z]{6,20}") {
            let service = cheap();
            let plaintext = format!("A1{body}");
            prop_assume!(PasswordPolicy::default().validate(&plaintext).valid);

            let hash = service.hash(&plaintext).unwrap();
            prop_assert!(service.verify(&plaintext, &hash));

            let different = format!("A1{other}");
            prop_assume!(different != plaintext);
            prop_assert!(!service.verify(&different, &hash));
        }
    }
}
