//! Password hashing seam for the emailpassword recipe.

use anyhow::Result;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Hashing strategy for stored passwords. Production deployments plug in
/// their own implementation; the shipped one is for tests and dev runs.
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password for storage.
    ///
    /// # Errors
    /// Fails when the underlying hash backend fails.
    fn hash(&self, password: &str) -> Result<String>;

    /// Check a plaintext password against a stored hash.
    ///
    /// # Errors
    /// Fails when the underlying hash backend fails.
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// Unsalted SHA-256, base64-encoded. Deterministic and fast on purpose;
/// not for production use.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256PasswordHasher;

impl PasswordHasher for Sha256PasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        Ok(self.hash(password)? == hash)
    }
}
