//! Crypto & keying: Argon2id key derivation, the symmetric
//! cipher suite, asymmetric key wrap and detached signatures.
//!
//! Key derivation: Argon2id(password, salt) -> key. The salt is random and
//! travels with the archive in its own `SALT` chunk rather than being
//! derived from an archive identifier, so every archive gets a genuinely
//! unique salt.

pub mod asym;
pub mod ciphers;

pub use asym::{sign, unwrap_key, verify, wrap_key, AsymError, SignatureState};
pub use ciphers::{Cipher, CipherError};

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use thiserror::Error;

/// Byte length of the random per-archive KDF salt stored in `SALT`.
pub const SALT_LEN: usize = 64;

/// Lower bound on Argon2id iterations; archives naming fewer are rejected
/// on open rather than silently strengthened or weakened.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_LANES: u32 = 1;
const ARGON2_MIN_OUTPUT_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Asym(#[from] AsymError),
    #[error("KDF iteration count {0} is below the minimum of {MIN_KDF_ITERATIONS}")]
    WeakKdf(u32),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Generate a fresh random salt for a new archive.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a symmetric key from a passphrase using Argon2id.
///
/// `iterations` is read from the archive's `META` chunk on open (and must
/// satisfy [`MIN_KDF_ITERATIONS`] on create); it is the Argon2 "time cost".
pub fn derive_key(
    password: &str,
    salt: &[u8],
    iterations: u32,
    key_len: usize,
) -> CryptoResult<Vec<u8>> {
    if iterations < MIN_KDF_ITERATIONS {
        return Err(CryptoError::WeakKdf(iterations));
    }
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        iterations,
        ARGON2_LANES,
        Some(key_len.max(ARGON2_MIN_OUTPUT_LEN)),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = vec![0u8; key_len];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic_for_same_inputs() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("hunter2", &salt, MIN_KDF_ITERATIONS, 32).unwrap();
        let b = derive_key("hunter2", &salt, MIN_KDF_ITERATIONS, 32).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_differs_across_salts() {
        let a = derive_key("hunter2", &[1u8; SALT_LEN], MIN_KDF_ITERATIONS, 32).unwrap();
        let b = derive_key("hunter2", &[2u8; SALT_LEN], MIN_KDF_ITERATIONS, 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn weak_kdf_iteration_count_is_rejected() {
        let err = derive_key("x", &[0u8; SALT_LEN], 1, 32).unwrap_err();
        assert!(matches!(err, CryptoError::WeakKdf(1)));
    }
}
