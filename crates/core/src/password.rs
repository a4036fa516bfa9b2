//! Salted password hashing.
//!
//! Stored credentials are PBKDF2-HMAC-SHA256 digests with a per-user random salt. The round
//! count is recorded next to the digest so existing hashes keep verifying after the configured
//! default changes.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const PASSWORD_HASH_ALGORITHM: &str = "pbkdf2-sha256";
pub const SALT_LENGTH: usize = 16;
pub const HASH_LENGTH: usize = 32;

/// A stored credential. Never contains the plaintext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    algorithm: String,
    iterations: u32,
    /// Hex-encoded salt
    salt: String,
    /// Hex-encoded derived key
    hash: String,
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHash")
            .field("algorithm", &self.algorithm)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl PasswordHash {
    /// Hashes `password` with a fresh random salt.
    pub fn create(password: &str, iterations: u32) -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(password, &salt, iterations)
    }

    fn with_salt(password: &str, salt: &[u8], iterations: u32) -> Self {
        Self {
            algorithm: PASSWORD_HASH_ALGORITHM.to_string(),
            iterations,
            salt: hex::encode(salt),
            hash: hex::encode(derive(password, salt, iterations)),
        }
    }

    /// A hash no password verifies against, with the same derivation cost as a real one.
    ///
    /// Used to keep a failed lookup as slow as a failed password check.
    pub fn unmatchable(iterations: u32) -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            algorithm: PASSWORD_HASH_ALGORITHM.to_string(),
            iterations,
            salt: hex::encode(salt),
            hash: hex::encode([0u8; HASH_LENGTH]),
        }
    }

    /// Returns true if `candidate` derives to the stored digest.
    ///
    /// A record with an unknown algorithm or malformed hex never verifies.
    pub fn verify(&self, candidate: &str) -> bool {
        if self.algorithm != PASSWORD_HASH_ALGORITHM {
            tracing::warn!(algorithm = %self.algorithm, "unsupported password hash algorithm");
            return false;
        }

        let (Ok(salt), Ok(expected)) = (hex::decode(&self.salt), hex::decode(&self.hash)) else {
            tracing::warn!("malformed password hash record");
            return false;
        };

        let actual = derive(candidate, &salt, self.iterations);
        actual.as_slice().ct_eq(expected.as_slice()).into()
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}
