//! Asymmetric key wrap and detached signatures.
//!
//! Key-wrap mode and passphrase mode are mutually exclusive per archive —
//! that invariant is enforced by the caller (`archive::engine`), not here.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AsymError {
    #[error("RSA key wrap failed: {0}")]
    WrapFailed(String),
    #[error("RSA key unwrap failed: {0}")]
    UnwrapFailed(String),
    #[error("signature is malformed")]
    MalformedSignature,
}

pub type AsymResult<T> = Result<T, AsymError>;

/// OAEP-wrap a freshly generated symmetric key under an RSA public key,
/// producing the payload stored in the archive's `KEY` chunk.
pub fn wrap_key(public_key: &RsaPublicKey, symmetric_key: &[u8]) -> AsymResult<Vec<u8>> {
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), symmetric_key)
        .map_err(|e| AsymError::WrapFailed(e.to_string()))
}

/// Recover the symmetric key from a `KEY` chunk payload using the matching
/// RSA private key.
pub fn unwrap_key(private_key: &RsaPrivateKey, wrapped: &[u8]) -> AsymResult<Vec<u8>> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|e| AsymError::UnwrapFailed(e.to_string()))
}

/// Four-valued outcome of signature verification — `Skipped`
/// covers the case where verification was deliberately not attempted
/// (no public key supplied), distinct from `None` (no `SIGN` chunk present).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    None,
    Ok,
    Invalid,
    Skipped,
}

/// Sign the SHA-256 hash of `archive_bytes` with an Ed25519 key, producing
/// the payload stored in the trailing `SIGN` chunk.
pub fn sign(signing_key: &SigningKey, archive_bytes: &[u8]) -> Vec<u8> {
    let hash = Sha256::digest(archive_bytes);
    let signature: Signature = signing_key.sign(&hash);
    signature.to_bytes().to_vec()
}

/// Verify a detached signature produced by [`sign`].
pub fn verify(
    verifying_key: &VerifyingKey,
    archive_bytes: &[u8],
    signature_bytes: &[u8],
) -> AsymResult<SignatureState> {
    let sig_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| AsymError::MalformedSignature)?;
    let signature = Signature::from_bytes(&sig_array);
    let hash = Sha256::digest(archive_bytes);
    match verifying_key.verify(&hash, &signature) {
        Ok(()) => Ok(SignatureState::Ok),
        Err(_) => Ok(SignatureState::Invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn ed25519_roundtrip() {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        let verifying_key = signing_key.verifying_key();
        let data = b"archive bytes up to but not including SIGN";
        let sig = sign(&signing_key, data);
        assert_eq!(verify(&verifying_key, data, &sig).unwrap(), SignatureState::Ok);
    }

    #[test]
    fn ed25519_tampered_data_is_invalid() {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        let verifying_key = signing_key.verifying_key();
        let sig = sign(&signing_key, b"original bytes");
        assert_eq!(
            verify(&verifying_key, b"tampered bytes!!", &sig).unwrap(),
            SignatureState::Invalid
        );
    }

    #[test]
    fn rsa_key_wrap_roundtrip() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        assert!(public_key.n().bits() >= 2048);
        let symmetric_key = [0x11u8; 32];
        let wrapped = wrap_key(&public_key, &symmetric_key).unwrap();
        let unwrapped = unwrap_key(&private_key, &wrapped).unwrap();
        assert_eq!(unwrapped, symmetric_key);
    }
}
