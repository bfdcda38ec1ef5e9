//! Password verification and strength policy
//!
//! Hashing itself belongs to the account directory; authentication only needs
//! `verify` at login. `validate` is the strength policy shared with whoever sets passwords.

use std::sync::{Arc, OnceLock};

/// Policy violations reported by [`PasswordVerifier::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PasswordViolation {
    #[error("Password too short (minimum 8 characters)")]
    TooShort,

    #[error("Password needs an uppercase letter")]
    MissingUppercase,

    #[error("Password needs a lowercase letter")]
    MissingLowercase,

    #[error("Password needs a digit")]
    MissingDigit,
}

/// Opaque password capability
pub trait PasswordVerifier: Send + Sync {
    /// Check `password` against a stored hash. Malformed hashes verify as false.
    fn verify(&self, password: &str, hash: &str) -> bool;

    /// Check `password` against the strength policy
    fn validate(&self, password: &str) -> Result<(), Vec<PasswordViolation>>;

    /// Spend the work of a real `verify` when there is no stored hash. Always false.
    fn verify_absent(&self, password: &str) -> bool {
        if let Some(hash) = absent_account_hash() {
            let _ = self.verify(password, hash);
        }
        false
    }
}

static ABSENT_ACCOUNT_HASH: OnceLock<Option<String>> = OnceLock::new();

/// Hash at the production cost, verified against when the account does not exist
fn absent_account_hash() -> Option<&'static str> {
    ABSENT_ACCOUNT_HASH
        .get_or_init(|| match bcrypt::hash("medgate:absent-account", bcrypt::DEFAULT_COST) {
            Ok(hash) => Some(hash),
            Err(err) => {
                tracing::error!(error = %err, "could not derive the absent-account hash");
                None
            }
        })
        .as_deref()
}

/// Minimum password length
const MIN_PASSWORD_LENGTH: usize = 8;

/// bcrypt-backed verifier
#[derive(Debug, Clone, Copy, Default)]
pub struct BcryptPasswordVerifier;

impl PasswordVerifier for BcryptPasswordVerifier {
    fn verify(&self, password: &str, hash: &str) -> bool {
        match bcrypt::verify(password, hash) {
            Ok(valid) => valid,
            Err(err) => {
                tracing::warn!(error = %err, "stored password hash could not be parsed");
                false
            }
        }
    }

    fn validate(&self, password: &str) -> Result<(), Vec<PasswordViolation>> {
        let mut violations = Vec::new();

        if password.chars().count() < MIN_PASSWORD_LENGTH {
            violations.push(PasswordViolation::TooShort);
        }
        if !password.chars().any(|c| c.is_uppercase()) {
            violations.push(PasswordViolation::MissingUppercase);
        }
        if !password.chars().any(|c| c.is_lowercase()) {
            violations.push(PasswordViolation::MissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PasswordViolation::MissingDigit);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Run `verify` on the blocking pool; bcrypt is deliberately slow
pub async fn verify_off_thread(
    verifier: Arc<dyn PasswordVerifier>,
    password: String,
    hash: String,
) -> bool {
    match tokio::task::spawn_blocking(move || verifier.verify(&password, &hash)).await {
        Ok(valid) => valid,
        Err(err) => {
            tracing::error!(error = %err, "password verification task failed");
            false
        }
    }
}

/// [`PasswordVerifier::verify_absent`] on the blocking pool
pub async fn verify_absent_off_thread(verifier: Arc<dyn PasswordVerifier>, password: String) {
    if let Err(err) =
        tokio::task::spawn_blocking(move || verifier.verify_absent(&password)).await
    {
        tracing::error!(error = %err, "password verification task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_matching_password() {
        let hash = bcrypt::hash("Sunshine!42", 4).unwrap();
        let verifier = BcryptPasswordVerifier;

        assert!(verifier.verify("Sunshine!42", &hash));
        assert!(!verifier.verify("sunshine!42", &hash));
    }

    #[test]
    fn test_verify_malformed_hash_is_false() {
        assert!(!BcryptPasswordVerifier.verify("Sunshine!42", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_validate_password_valid() {
        let verifier = BcryptPasswordVerifier;
        assert!(verifier.validate("Password1").is_ok());
        assert!(verifier.validate("Sunshine!42").is_ok());
    }

    #[test]
    fn test_validate_password_reports_every_violation() {
        let violations = BcryptPasswordVerifier.validate("abc").unwrap_err();
        assert_eq!(
            violations,
            vec![
                PasswordViolation::TooShort,
                PasswordViolation::MissingUppercase,
                PasswordViolation::MissingDigit,
            ]
        );
    }

    #[tokio::test]
    async fn test_verify_off_thread() {
        let hash = bcrypt::hash("Sunshine!42", 4).unwrap();
        let verifier: Arc<dyn PasswordVerifier> = Arc::new(BcryptPasswordVerifier);

        assert!(verify_off_thread(verifier.clone(), "Sunshine!42".to_string(), hash.clone()).await);
        assert!(!verify_off_thread(verifier, "wrong".to_string(), hash).await);
    }

    #[test]
    fn test_absent_account_hash_costs_a_real_verify() {
        let hash = absent_account_hash().unwrap();
        assert!(hash.starts_with(&format!("$2b${}$", bcrypt::DEFAULT_COST)));
        // A parseable hash means bcrypt runs the full key schedule
        assert!(bcrypt::verify("Sunshine!42", hash).is_ok());
    }

    #[tokio::test]
    async fn test_verify_absent_is_never_true() {
        let verifier: Arc<dyn PasswordVerifier> = Arc::new(BcryptPasswordVerifier);
        assert!(!verifier.verify_absent("medgate:absent-account"));
        verify_absent_off_thread(verifier, "Sunshine!42".to_string()).await;
    }
}
