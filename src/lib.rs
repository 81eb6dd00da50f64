//! # bararc — deduplicating, encrypted, compressed backup archiver
//!
//! Format guarantees:
//! - Every multi-byte integer is big-endian; never negotiated
//! - Every chunk is self-describing: a 4-byte id and an 8-byte length: an
//!   unknown id is always safe to skip by length alone
//! - Cipher and compression identity are frozen enum discriminants; an
//!   archive names the ones it was written with in its `META` chunk, and a
//!   reader that lacks one fails closed rather than silently passing data
//!   through
//! - An archive can be scanned and partially reconstructed from chunk
//!   boundaries alone, without any index, per `recovery::scan`

pub mod archive;
pub mod chunk;
pub mod compress;
pub mod credential;
pub mod crypto;
pub mod listing;
pub mod recovery;
pub mod storage;

pub use archive::{
    ArchiveError, ArchiveMeta, ArchiveReader, ArchiveWriter, CreateOptions, DeltaAlgorithm, EngineContext,
    EntryAttributes, EntryKind, EntryState, EntryWriter,
};
pub use chunk::{ChunkError, ChunkId, ChunkReader, ChunkWriter, WriteStrategy};
pub use compress::{ByteAlgorithm, ByteCompressor, CompressError};
pub use credential::{AuthenticationError, CredentialCallback, CredentialKey, CredentialKind, DefaultPasswordCache, Secret};
pub use crypto::{Cipher, CryptoError, SignatureState};
pub use listing::{GlobFilter, ListEntry, ListError};
pub use recovery::{RecoveryQuality, RecoveryReport, ScannedChunk};
pub use storage::{equal_specifiers, open_backend, DirEntryInfo, StorageBackend, StorageCapabilities, StorageError, StorageSpecifier};
