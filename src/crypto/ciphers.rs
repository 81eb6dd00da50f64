//! Symmetric cipher suite. Every variant below is block-or-stream
//! agnostic at the call site: [`Cipher::encrypt`]/[`Cipher::decrypt`] always
//! take and return a plain byte slice, with a fresh CSPRNG IV of the cipher's
//! natural size prepended to the output.

use aes::Aes128 as Aes128Block;
use aes::Aes256 as Aes256Block;
use camellia::Camellia128 as Camellia128Block;
use camellia::Camellia256 as Camellia256Block;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20::cipher::{KeyIvInit as StreamKeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use rand::RngCore;
use serpent::Serpent;
use thiserror::Error;
use twofish::Twofish;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("cipher {0:?} is not supported by this build")]
    Unsupported(Cipher),
    #[error("ciphertext too short to contain an IV")]
    TooShort,
    #[error("padding is invalid — wrong key or corrupted data")]
    BadPadding,
    #[error("key length {got} does not match the {want}-byte key required by {cipher:?}")]
    BadKeyLength { cipher: Cipher, want: usize, got: usize },
}

pub type CipherResult<T> = Result<T, CipherError>;

/// Symmetric ciphers a cipher-suite byte in `META` may name.
/// Numeric discriminants are the on-wire encoding and must never be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum Cipher {
    None = 0,
    Aes128Cbc = 1,
    Aes256Cbc = 2,
    Twofish128 = 3,
    Twofish256 = 4,
    Serpent128 = 5,
    Serpent256 = 6,
    Camellia128 = 7,
    Camellia256 = 8,
    ChaCha20 = 9,
}

impl Cipher {
    pub fn from_wire(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Cipher::None,
            1 => Cipher::Aes128Cbc,
            2 => Cipher::Aes256Cbc,
            3 => Cipher::Twofish128,
            4 => Cipher::Twofish256,
            5 => Cipher::Serpent128,
            6 => Cipher::Serpent256,
            7 => Cipher::Camellia128,
            8 => Cipher::Camellia256,
            9 => Cipher::ChaCha20,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Key length in bytes this cipher requires.
    pub fn key_len(self) -> usize {
        match self {
            Cipher::None => 0,
            Cipher::Aes128Cbc | Cipher::Twofish128 | Cipher::Serpent128 | Cipher::Camellia128 => 16,
            Cipher::Aes256Cbc | Cipher::Twofish256 | Cipher::Serpent256 | Cipher::Camellia256 => 32,
            Cipher::ChaCha20 => 32,
        }
    }

    /// IV/nonce length in bytes prepended to every ciphertext.
    pub fn iv_len(self) -> usize {
        match self {
            Cipher::None => 0,
            Cipher::ChaCha20 => 12,
            // All block ciphers in this suite share a 16-byte block size.
            _ => 16,
        }
    }

    fn check_key(self, key: &[u8]) -> CipherResult<()> {
        let want = self.key_len();
        if key.len() != want {
            return Err(CipherError::BadKeyLength { cipher: self, want, got: key.len() });
        }
        Ok(())
    }

    /// Encrypt `plaintext`, returning `iv || ciphertext` (PKCS#7-padded for
    /// block ciphers).
    pub fn encrypt(self, key: &[u8], plaintext: &[u8]) -> CipherResult<Vec<u8>> {
        if matches!(self, Cipher::None) {
            return Ok(plaintext.to_vec());
        }
        self.check_key(key)?;
        let mut iv = vec![0u8; self.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);
        let body = match self {
            Cipher::Aes128Cbc => cbc_encrypt::<Aes128Block>(key, &iv, plaintext),
            Cipher::Aes256Cbc => cbc_encrypt::<Aes256Block>(key, &iv, plaintext),
            Cipher::Twofish128 | Cipher::Twofish256 => cbc_encrypt::<Twofish>(key, &iv, plaintext),
            Cipher::Serpent128 | Cipher::Serpent256 => cbc_encrypt::<Serpent>(key, &iv, plaintext),
            Cipher::Camellia128 => cbc_encrypt::<Camellia128Block>(key, &iv, plaintext),
            Cipher::Camellia256 => cbc_encrypt::<Camellia256Block>(key, &iv, plaintext),
            Cipher::ChaCha20 => {
                let mut buf = plaintext.to_vec();
                let mut c = ChaCha20::new(key.into(), iv.as_slice().into());
                c.apply_keystream(&mut buf);
                buf
            }
            Cipher::None => unreachable!(),
        };
        let mut out = Vec::with_capacity(iv.len() + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decrypt(self, key: &[u8], data: &[u8]) -> CipherResult<Vec<u8>> {
        if matches!(self, Cipher::None) {
            return Ok(data.to_vec());
        }
        self.check_key(key)?;
        let iv_len = self.iv_len();
        if data.len() < iv_len {
            return Err(CipherError::TooShort);
        }
        let (iv, body) = data.split_at(iv_len);
        match self {
            Cipher::Aes128Cbc => cbc_decrypt::<Aes128Block>(key, iv, body),
            Cipher::Aes256Cbc => cbc_decrypt::<Aes256Block>(key, iv, body),
            Cipher::Twofish128 | Cipher::Twofish256 => cbc_decrypt::<Twofish>(key, iv, body),
            Cipher::Serpent128 | Cipher::Serpent256 => cbc_decrypt::<Serpent>(key, iv, body),
            Cipher::Camellia128 => cbc_decrypt::<Camellia128Block>(key, iv, body),
            Cipher::Camellia256 => cbc_decrypt::<Camellia256Block>(key, iv, body),
            Cipher::ChaCha20 => {
                let mut buf = body.to_vec();
                let mut c = ChaCha20::new(key.into(), iv.into());
                c.apply_keystream(&mut buf);
                Ok(buf)
            }
            Cipher::None => unreachable!(),
        }
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8>
where
    C: cbc::cipher::BlockSizeUser + cbc::cipher::KeyInit + Clone,
    cbc::Encryptor<C>: BlockEncryptMut + KeyIvInit,
{
    cbc::Encryptor::<C>::new(key.into(), iv.into())
        .encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(plaintext)
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CipherResult<Vec<u8>>
where
    C: cbc::cipher::BlockSizeUser + cbc::cipher::KeyInit + Clone,
    cbc::Decryptor<C>: BlockDecryptMut + KeyIvInit,
{
    cbc::Decryptor::<C>::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(ciphertext)
        .map_err(|_| CipherError::BadPadding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(cipher: Cipher) {
        let key = vec![0x42u8; cipher.key_len().max(1)];
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ciphertext = cipher.encrypt(&key, plaintext).unwrap();
        let decrypted = cipher.decrypt(&key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn roundtrip_all_ciphers() {
        for c in [
            Cipher::Aes128Cbc,
            Cipher::Aes256Cbc,
            Cipher::Twofish128,
            Cipher::Twofish256,
            Cipher::Serpent128,
            Cipher::Serpent256,
            Cipher::Camellia128,
            Cipher::Camellia256,
            Cipher::ChaCha20,
        ] {
            roundtrip(c);
        }
    }

    #[test]
    fn none_cipher_is_identity() {
        let data = b"plaintext passthrough";
        assert_eq!(Cipher::None.encrypt(&[], data).unwrap(), data);
        assert_eq!(Cipher::None.decrypt(&[], data).unwrap(), data);
    }

    #[test]
    fn wire_roundtrip_covers_all_discriminants() {
        for b in 0..=9u8 {
            let c = Cipher::from_wire(b).unwrap();
            assert_eq!(c.to_wire(), b);
        }
        assert!(Cipher::from_wire(10).is_none());
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let err = Cipher::Aes256Cbc.encrypt(&[0u8; 8], b"x").unwrap_err();
        assert!(matches!(err, CipherError::BadKeyLength { .. }));
    }
}
