//! Password hashing with Argon2id.
//!
//! Hashes are stored in PHC string format so parameters travel with the
//! hash and can be upgraded without a migration.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{PasswordHash, SaltString, rand_core::OsRng},
};

/// Hash a plaintext password with Argon2id and a fresh random salt.
///
/// # Errors
///
/// Returns an error if the hasher rejects the input.
pub(crate) fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Verify a plaintext password against a stored PHC-format hash.
///
/// Returns `Ok(true)` on match, `Ok(false)` on mismatch.
///
/// # Errors
///
/// Returns an error if the stored hash is malformed.
pub(crate) fn verify_password(plain: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|err| anyhow!("invalid stored hash: {err}"))?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("password verification error: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_password_matches() -> Result<()> {
        let hash = hash_password("Passw0rd1")?;
        assert!(verify_password("Passw0rd1", &hash)?);
        Ok(())
    }

    #[test]
    fn wrong_password_does_not_match() -> Result<()> {
        let hash = hash_password("Passw0rd1")?;
        assert!(!verify_password("Passw0rd2", &hash)?);
        Ok(())
    }

    #[test]
    fn salts_differ_between_hashes() -> Result<()> {
        let first = hash_password("Passw0rd1")?;
        let second = hash_password("Passw0rd1")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("pw", "not-a-phc-hash").is_err());
    }
}
