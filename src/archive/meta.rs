//! Archive-level metadata (`META` chunk) — the cipher suite, KDF
//! parameters, and default compression algorithms an archive was written
//! with. Per-fragment chunks may still override the byte/delta algorithm;
//! `META` only records the archive-wide defaults new entries are created
//! with.

use crate::compress::{ByteAlgorithm, CompressError};
use crate::crypto::ciphers::CipherError;
use crate::crypto::Cipher;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Read, Write};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("unknown cipher byte {0}")]
    UnknownCipher(u8),
    #[error("unknown byte-compression algorithm {0}")]
    UnknownByteAlgorithm(u8),
    #[error("unknown delta-compression algorithm {0}")]
    UnknownDeltaAlgorithm(u8),
    #[error("unknown archive type byte {0}")]
    UnknownArchiveType(u8),
    #[error("comment field is not valid UTF-8")]
    BadComment,
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Compress(#[from] CompressError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Archive generation kind recorded in `META`. Mirrors the job scheduling
/// vocabulary a backup run is classified under, independent of the
/// chunk-level delta/compression choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ArchiveType {
    Normal = 0,
    Full = 1,
    Incremental = 2,
    Differential = 3,
    Continuous = 4,
}

impl ArchiveType {
    pub fn from_wire(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => ArchiveType::Normal,
            1 => ArchiveType::Full,
            2 => ArchiveType::Incremental,
            3 => ArchiveType::Differential,
            4 => ArchiveType::Continuous,
            _ => return None,
        })
    }
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Delta algorithm an archive defaults new fragments to. Kept separate from
/// [`crate::compress::ByteAlgorithm`] since the two stages are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum DeltaAlgorithm {
    None = 0,
    XDelta = 1,
}

impl DeltaAlgorithm {
    pub fn from_wire(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => DeltaAlgorithm::None,
            1 => DeltaAlgorithm::XDelta,
            _ => return None,
        })
    }
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveMeta {
    pub format_version: u16,
    pub cipher: Cipher,
    pub kdf_iterations: u32,
    pub default_byte_algorithm: ByteAlgorithm,
    pub default_byte_level: i32,
    pub default_delta_algorithm: DeltaAlgorithm,
    pub default_fragment_size: u64,
    /// Set when the archive's symmetric key is wrapped asymmetrically
    /// (`KEY` chunk present) rather than derived from a passphrase.
    pub asymmetric_key_wrap: bool,
    /// Host the archive was created on.
    pub host_name: String,
    /// User the archive was created as.
    pub user_name: String,
    /// Unique per-run identifier, fresh for every archive creation.
    pub job_uuid: Uuid,
    /// Stable identifier shared across one entity's full/incremental/
    /// differential archive chain.
    pub entity_uuid: Uuid,
    pub archive_type: ArchiveType,
    pub created_at: DateTime<Utc>,
    /// Free-form operator-supplied note; empty when unset.
    pub comment: String,
}

pub const CURRENT_FORMAT_VERSION: u16 = 1;
pub const DEFAULT_FRAGMENT_SIZE: u64 = 128 * 1024 * 1024;

impl Default for ArchiveMeta {
    fn default() -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            cipher: Cipher::None,
            kdf_iterations: crate::crypto::MIN_KDF_ITERATIONS,
            default_byte_algorithm: ByteAlgorithm::Zstd,
            default_byte_level: 3,
            default_delta_algorithm: DeltaAlgorithm::None,
            default_fragment_size: DEFAULT_FRAGMENT_SIZE,
            asymmetric_key_wrap: false,
            host_name: String::new(),
            user_name: String::new(),
            job_uuid: Uuid::nil(),
            entity_uuid: Uuid::nil(),
            archive_type: ArchiveType::Normal,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            comment: String::new(),
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.write_u32::<BigEndian>(bytes.len() as u32).unwrap();
    buf.extend_from_slice(bytes);
}

fn read_string(payload: &mut &[u8]) -> Result<String, MetaError> {
    let len = payload.read_u32::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    payload.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| MetaError::BadComment)
}

impl ArchiveMeta {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u16::<BigEndian>(self.format_version).unwrap();
        buf.write_u8(self.cipher.to_wire()).unwrap();
        buf.write_u32::<BigEndian>(self.kdf_iterations).unwrap();
        buf.write_u8(self.default_byte_algorithm.to_wire()).unwrap();
        buf.write_i32::<BigEndian>(self.default_byte_level).unwrap();
        buf.write_u8(self.default_delta_algorithm.to_wire()).unwrap();
        buf.write_u64::<BigEndian>(self.default_fragment_size).unwrap();
        buf.write_u8(self.asymmetric_key_wrap as u8).unwrap();
        write_string(&mut buf, &self.host_name);
        write_string(&mut buf, &self.user_name);
        buf.extend_from_slice(self.job_uuid.as_bytes());
        buf.extend_from_slice(self.entity_uuid.as_bytes());
        buf.write_u8(self.archive_type.to_wire()).unwrap();
        buf.write_i64::<BigEndian>(self.created_at.timestamp()).unwrap();
        write_string(&mut buf, &self.comment);
        buf
    }

    pub fn decode(mut payload: &[u8]) -> Result<Self, MetaError> {
        let format_version = payload.read_u16::<BigEndian>()?;
        let cipher_byte = payload.read_u8()?;
        let cipher = Cipher::from_wire(cipher_byte).ok_or(MetaError::UnknownCipher(cipher_byte))?;
        let kdf_iterations = payload.read_u32::<BigEndian>()?;
        let byte_algo_byte = payload.read_u8()?;
        let default_byte_algorithm =
            ByteAlgorithm::from_wire(byte_algo_byte).ok_or(MetaError::UnknownByteAlgorithm(byte_algo_byte))?;
        let default_byte_level = payload.read_i32::<BigEndian>()?;
        let delta_algo_byte = payload.read_u8()?;
        let default_delta_algorithm =
            DeltaAlgorithm::from_wire(delta_algo_byte).ok_or(MetaError::UnknownDeltaAlgorithm(delta_algo_byte))?;
        let default_fragment_size = payload.read_u64::<BigEndian>()?;
        let asymmetric_key_wrap = payload.read_u8()? != 0;
        let host_name = read_string(&mut payload)?;
        let user_name = read_string(&mut payload)?;
        let mut job_uuid_bytes = [0u8; 16];
        payload.read_exact(&mut job_uuid_bytes)?;
        let job_uuid = Uuid::from_bytes(job_uuid_bytes);
        let mut entity_uuid_bytes = [0u8; 16];
        payload.read_exact(&mut entity_uuid_bytes)?;
        let entity_uuid = Uuid::from_bytes(entity_uuid_bytes);
        let archive_type_byte = payload.read_u8()?;
        let archive_type =
            ArchiveType::from_wire(archive_type_byte).ok_or(MetaError::UnknownArchiveType(archive_type_byte))?;
        let created_at_secs = payload.read_i64::<BigEndian>()?;
        let created_at = DateTime::<Utc>::from_timestamp(created_at_secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let comment = read_string(&mut payload)?;
        Ok(Self {
            format_version,
            cipher,
            kdf_iterations,
            default_byte_algorithm,
            default_byte_level,
            default_delta_algorithm,
            default_fragment_size,
            asymmetric_key_wrap,
            host_name,
            user_name,
            job_uuid,
            entity_uuid,
            archive_type,
            created_at,
            comment,
        })
    }
}

/// Build the default delta compressor for `algorithm`, given a resolved
/// source byte stream (empty when no delta source is available).
pub fn make_delta_encoder(algorithm: DeltaAlgorithm, source: Vec<u8>) -> Box<dyn crate::compress::delta::DeltaCompressor> {
    match algorithm {
        DeltaAlgorithm::None => Box::new(crate::compress::delta::NoDelta::default()),
        DeltaAlgorithm::XDelta => Box::new(crate::compress::delta::XDelta::new_encoder(source)),
    }
}

pub fn make_delta_decoder(algorithm: DeltaAlgorithm, source: Vec<u8>) -> Box<dyn crate::compress::delta::DeltaCompressor> {
    match algorithm {
        DeltaAlgorithm::None => Box::new(crate::compress::delta::NoDelta::default()),
        DeltaAlgorithm::XDelta => Box::new(crate::compress::delta::XDelta::new_decoder(source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let meta = ArchiveMeta {
            cipher: Cipher::Aes256Cbc,
            kdf_iterations: 200_000,
            default_byte_algorithm: ByteAlgorithm::Lz4,
            default_byte_level: 1,
            default_delta_algorithm: DeltaAlgorithm::XDelta,
            default_fragment_size: 64 * 1024 * 1024,
            asymmetric_key_wrap: true,
            ..ArchiveMeta::default()
        };
        let encoded = meta.encode();
        let decoded = ArchiveMeta::decode(&encoded).unwrap();
        assert_eq!(decoded.cipher, Cipher::Aes256Cbc);
        assert_eq!(decoded.kdf_iterations, 200_000);
        assert_eq!(decoded.default_byte_algorithm, ByteAlgorithm::Lz4);
        assert_eq!(decoded.default_delta_algorithm, DeltaAlgorithm::XDelta);
        assert!(decoded.asymmetric_key_wrap);
    }

    #[test]
    fn decode_rejects_unknown_cipher_byte() {
        let mut encoded = ArchiveMeta::default().encode();
        encoded[2] = 0xFF;
        assert!(matches!(ArchiveMeta::decode(&encoded), Err(MetaError::UnknownCipher(0xFF))));
    }
}
