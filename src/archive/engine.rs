//! Archive engine: open/create/close semantics over a
//! [`StorageBackend`], atomic commit via rename, and signature-based
//! verification.

use crate::chunk::{self, ChunkReader, ChunkWriter, WriteStrategy};
use crate::credential::{CredentialCallback, DefaultPasswordCache};
use crate::crypto::asym::SignatureState;
use crate::crypto::{self, Cipher};
use crate::storage::{StorageBackend, StorageCapabilities, StorageHandle};
use byteorder::{BigEndian, ReadBytesExt};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::entry::{EntryError, FragmentPipelineConfig};
use super::meta::{ArchiveMeta, MetaError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("wrong password")]
    InvalidPassword,
    #[error("cipher named by this archive is not supported by this build")]
    UnsupportedCipher,
    #[error("archive does not start with a BAR0 marker")]
    NotAnArchive,
    #[error("archive uses asymmetric key wrap but no private key was supplied")]
    MissingPrivateKey,
    #[error("archive was marked invalid after a prior write error")]
    Invalid,
    #[error(transparent)]
    Meta(#[from] MetaError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Chunk(#[from] chunk::ChunkError),
    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Shared engine state for one open archive: credential cache, invalidity
/// flag, and the resolved signing/verification keys. Explicit and owned,
/// never a process-wide global.
pub struct EngineContext {
    pub credentials: DefaultPasswordCache,
    pub callback: Arc<dyn CredentialCallback>,
    invalid: AtomicBool,
}

impl EngineContext {
    pub fn new(callback: Arc<dyn CredentialCallback>) -> Self {
        Self { credentials: DefaultPasswordCache::new(), callback, invalid: AtomicBool::new(false) }
    }

    pub fn mark_invalid(&self) {
        self.invalid.store(true, Ordering::SeqCst);
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::SeqCst)
    }
}

/// Options controlling a newly created archive, passed as constructor
/// arguments rather than mutated onto a builder.
pub struct CreateOptions {
    pub meta: ArchiveMeta,
    pub passphrase: Option<String>,
    pub public_key: Option<RsaPublicKey>,
    pub signing_key: Option<SigningKey>,
}

/// Writes chunks directly to a backend-provided handle, building the
/// `BAR0`/`SALT`/`KEY`/`META` preamble on creation and an optional `SIGN`
/// trailer on close.
pub struct ArchiveWriter<H: Write + Seek> {
    chunk_writer: ChunkWriter<H>,
    meta: ArchiveMeta,
    key: Vec<u8>,
    signing_key: Option<SigningKey>,
}

impl<H: Write + Seek> ArchiveWriter<H> {
    pub fn create(handle: H, options: CreateOptions) -> ArchiveResult<Self> {
        let mut chunk_writer = ChunkWriter::new(handle, WriteStrategy::Seekable);
        chunk_writer.write_chunk(chunk::BAR0, &[])?;

        let key = match (&options.passphrase, &options.public_key) {
            (Some(pass), None) => {
                let salt = crypto::generate_salt();
                chunk_writer.write_chunk(chunk::SALT, &salt)?;
                crypto::derive_key(pass, &salt, options.meta.kdf_iterations, options.meta.cipher.key_len())?
            }
            (None, Some(public_key)) => {
                let mut symmetric_key = vec![0u8; options.meta.cipher.key_len().max(32)];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut symmetric_key);
                let wrapped = crypto::wrap_key(public_key, &symmetric_key)?;
                chunk_writer.write_chunk(chunk::KEY, &wrapped)?;
                symmetric_key
            }
            (None, None) => Vec::new(),
            (Some(_), Some(_)) => {
                return Err(ArchiveError::Meta(MetaError::UnknownCipher(0)));
            }
        };

        let mut meta = options.meta;
        meta.asymmetric_key_wrap = options.public_key.is_some();
        chunk_writer.write_chunk(chunk::META, &meta.encode())?;

        Ok(Self { chunk_writer, meta, key, signing_key: options.signing_key })
    }

    pub fn meta(&self) -> &ArchiveMeta {
        &self.meta
    }

    pub fn fragment_config(&self, delta_source: Vec<u8>) -> FragmentPipelineConfig {
        FragmentPipelineConfig {
            cipher: self.meta.cipher,
            key: self.key.clone(),
            byte_algorithm: self.meta.default_byte_algorithm,
            byte_level: self.meta.default_byte_level,
            delta_algorithm: self.meta.default_delta_algorithm,
            delta_source,
            fragment_size: self.meta.default_fragment_size,
        }
    }

    pub fn chunk_writer_mut(&mut self) -> &mut ChunkWriter<H> {
        &mut self.chunk_writer
    }

    /// Flush any in-flight entry (callers are responsible for closing their
    /// own `EntryWriter`s before calling this), optionally append a `SIGN`
    /// trailer, and return the underlying handle for the caller to commit
    /// (rename into place) via the storage backend.
    pub fn close(mut self) -> ArchiveResult<H> {
        if let Some(signing_key) = &self.signing_key {
            let handle = self.chunk_writer.get_mut();
            let end = handle.stream_position()?;
            handle.seek(SeekFrom::Start(0))?;
            let mut archive_bytes = vec![0u8; end as usize];
            handle.read_exact(&mut archive_bytes)?;
            handle.seek(SeekFrom::Start(end))?;
            let signature = crypto::sign(signing_key, &archive_bytes);
            self.chunk_writer.write_chunk(chunk::SIGN, &signature)?;
        }
        Ok(self.chunk_writer.into_inner())
    }
}

/// Reads the preamble of an archive and exposes its chunk stream for entry
/// iteration (component D's reverse direction lives in higher-level list
/// helpers built on top of this reader).
pub struct ArchiveReader<H: Read + Seek> {
    chunk_reader: ChunkReader<H>,
    pub meta: ArchiveMeta,
    key: Vec<u8>,
}

impl<H: Read + Seek> ArchiveReader<H> {
    /// Open an archive for reading. `resolve_key` is consulted only if the
    /// archive uses passphrase-derived keying; for asymmetric archives,
    /// `private_key` must be supplied instead.
    pub fn open(
        mut handle: H,
        resolve_key: impl FnOnce(&[u8], u32, usize) -> ArchiveResult<Vec<u8>>,
        private_key: Option<&RsaPrivateKey>,
    ) -> ArchiveResult<Self> {
        let mut chunk_reader = ChunkReader::new(&mut handle);
        let header = chunk_reader.read_header()?.ok_or(ArchiveError::NotAnArchive)?;
        if header.id != chunk::BAR0 {
            return Err(ArchiveError::NotAnArchive);
        }
        chunk_reader.read_payload(header.length)?;

        let mut salt: Option<Vec<u8>> = None;
        let mut wrapped_key: Option<Vec<u8>> = None;
        let mut meta: Option<ArchiveMeta> = None;

        loop {
            let next = chunk_reader.read_header()?;
            let Some(h) = next else { break };
            let payload = chunk_reader.read_payload(h.length)?;
            match h.id {
                chunk::SALT => salt = Some(payload),
                chunk::KEY => wrapped_key = Some(payload),
                chunk::META => {
                    meta = Some(ArchiveMeta::decode(&payload)?);
                    break;
                }
                _ => {}
            }
        }
        let meta = meta.ok_or(ArchiveError::NotAnArchive)?;

        let key = if meta.asymmetric_key_wrap {
            let private_key = private_key.ok_or(ArchiveError::MissingPrivateKey)?;
            let wrapped = wrapped_key.ok_or(ArchiveError::MissingPrivateKey)?;
            crypto::unwrap_key(private_key, &wrapped).map_err(|_| ArchiveError::InvalidPassword)?
        } else if matches!(meta.cipher, Cipher::None) {
            Vec::new()
        } else {
            let salt = salt.ok_or(ArchiveError::NotAnArchive)?;
            resolve_key(&salt, meta.kdf_iterations, meta.cipher.key_len())?
        };

        drop(chunk_reader);
        let chunk_reader = ChunkReader::new(handle);
        Ok(Self { chunk_reader, meta, key })
    }

    pub fn fragment_config(&self, delta_source: Vec<u8>) -> FragmentPipelineConfig {
        FragmentPipelineConfig {
            cipher: self.meta.cipher,
            key: self.key.clone(),
            byte_algorithm: self.meta.default_byte_algorithm,
            byte_level: self.meta.default_byte_level,
            delta_algorithm: self.meta.default_delta_algorithm,
            delta_source,
            fragment_size: self.meta.default_fragment_size,
        }
    }

    pub fn chunk_reader_mut(&mut self) -> &mut ChunkReader<H> {
        &mut self.chunk_reader
    }
}

/// Re-derive and check the detached signature of a closed archive.
/// Returns `SignatureState::None` if there is no `SIGN` chunk at all.
pub fn verify_signature<H: Read + Seek>(mut handle: H, verifying_key: Option<&VerifyingKey>) -> ArchiveResult<SignatureState> {
    let total_len = handle.seek(SeekFrom::End(0))?;
    handle.seek(SeekFrom::Start(0))?;
    let mut all_bytes = vec![0u8; total_len as usize];
    handle.read_exact(&mut all_bytes)?;

    let mut cursor = Cursor::new(&all_bytes[..]);
    let mut sign_start = None;
    let mut sign_payload = None;
    loop {
        let pos = cursor.position();
        let mut id = [0u8; 4];
        if cursor.read_exact(&mut id).is_err() {
            break;
        }
        let length = cursor.read_u64::<BigEndian>()?;
        if id == chunk::SIGN.0 {
            sign_start = Some(pos);
            let mut payload = vec![0u8; length as usize];
            cursor.read_exact(&mut payload)?;
            sign_payload = Some(payload);
            break;
        }
        cursor.seek(SeekFrom::Current(length as i64))?;
    }

    let (Some(sign_start), Some(signature)) = (sign_start, sign_payload) else {
        return Ok(SignatureState::None);
    };
    let Some(verifying_key) = verifying_key else {
        return Ok(SignatureState::Skipped);
    };
    let signed_bytes = &all_bytes[..sign_start as usize];
    Ok(crypto::verify(verifying_key, signed_bytes, &signature)?)
}

/// Consult a backend's capabilities to choose the chunk write strategy:
/// seekable backends backpatch lengths in place, streaming backends buffer
/// and length-prefix up front.
pub fn write_strategy_for(capabilities: &StorageCapabilities) -> WriteStrategy {
    if capabilities.random_access_write {
        WriteStrategy::Seekable
    } else {
        WriteStrategy::Streaming
    }
}

/// Commit a finished write: rename from a temp name into the final path if
/// the backend supports it directly, otherwise hand the buffered bytes to
/// `finalize_write`.
pub fn commit(
    backend: &dyn StorageBackend,
    handle: Box<dyn StorageHandle>,
    tmp_path: &str,
    final_path: &str,
) -> ArchiveResult<()> {
    let capabilities = backend.capabilities();
    if capabilities.random_access_write {
        drop(handle);
        if capabilities.rename_atomic && tmp_path != final_path {
            backend.rename(tmp_path, final_path)?;
        }
    } else {
        backend.finalize_write(final_path, handle)?;
        if capabilities.rename_atomic && tmp_path != final_path {
            backend.rename(tmp_path, final_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::ByteAlgorithm;
    use std::io::Cursor;

    fn no_crypto_meta() -> ArchiveMeta {
        ArchiveMeta { cipher: Cipher::None, default_byte_algorithm: ByteAlgorithm::None, ..ArchiveMeta::default() }
    }

    #[test]
    fn create_then_open_roundtrips_meta() {
        let mut backing = Cursor::new(Vec::new());
        {
            let writer = ArchiveWriter::create(
                &mut backing,
                CreateOptions { meta: no_crypto_meta(), passphrase: None, public_key: None, signing_key: None },
            )
            .unwrap();
            writer.close().unwrap();
        }

        let reader = ArchiveReader::open(Cursor::new(backing.into_inner()), |_, _, _| unreachable!(), None).unwrap();
        assert_eq!(reader.meta.cipher, Cipher::None);
    }

    #[test]
    fn open_rejects_stream_without_bar0() {
        let backing = Cursor::new(b"XXXX\x00\x00\x00\x00\x00\x00\x00\x00".to_vec());
        let err = ArchiveReader::open(backing, |_, _, _| unreachable!(), None).unwrap_err();
        assert!(matches!(err, ArchiveError::NotAnArchive));
    }

    #[test]
    fn signature_roundtrip_via_verify() {
        use rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        let mut backing = Cursor::new(Vec::new());
        {
            let writer = ArchiveWriter::create(
                &mut backing,
                CreateOptions {
                    meta: no_crypto_meta(),
                    passphrase: None,
                    public_key: None,
                    signing_key: Some(signing_key),
                },
            )
            .unwrap();
            writer.close().unwrap();
        }

        let state = verify_signature(Cursor::new(backing.into_inner()), Some(&verifying_key)).unwrap();
        assert_eq!(state, SignatureState::Ok);
    }

    #[test]
    fn verify_signature_none_when_no_sign_chunk() {
        let mut backing = Cursor::new(Vec::new());
        {
            let writer = ArchiveWriter::create(
                &mut backing,
                CreateOptions { meta: no_crypto_meta(), passphrase: None, public_key: None, signing_key: None },
            )
            .unwrap();
            writer.close().unwrap();
        }
        let state = verify_signature(Cursor::new(backing.into_inner()), None).unwrap();
        assert_eq!(state, SignatureState::None);
    }
}
