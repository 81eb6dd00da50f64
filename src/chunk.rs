//! Chunk codec — the universal framing unit of the archive.
//!
//! # On-disk layout
//!
//! ```text
//! Offset  Size  Field
//!    0      4   id       4 ASCII bytes, opaque tag (not NUL-terminated)
//!    4      8   length   payload length in bytes, big-endian u64
//!    12     N   payload  chunk-kind-specific fields followed by child chunks
//! ```
//!
//! Chunk nesting is a tree; only the parent/child relations named below are
//! legal, but an unknown id is always safe to skip by length alone — that is
//! the forward-compatibility contract the whole format rests on.
//!
//! # Endianness
//! Every multi-byte integer in the archive format is big-endian. See
//! `DESIGN.md` for the rationale.

use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

/// Byte size of the fixed chunk header (id + length).
pub const CHUNK_HEADER_SIZE: usize = 12;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("chunk truncated: expected {expected} more bytes, stream ended")]
    Truncated { expected: usize },
    #[error("child chunk of {declared} bytes overruns parent payload ({remaining} bytes left)")]
    Overrun { declared: u64, remaining: u64 },
    #[error("chunk id {id:?} is not legal at this position")]
    Unexpected { id: ChunkId },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ChunkResult<T> = Result<T, ChunkError>;

/// A 4-byte ASCII chunk identifier. Opaque — any stable assignment is valid
/// per format version, the set below is this crate's frozen assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ChunkId(pub [u8; 4]);

impl ChunkId {
    pub const fn new(tag: &[u8; 4]) -> Self {
        ChunkId(*tag)
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

macro_rules! chunk_ids {
    ($($name:ident = $tag:expr;)*) => {
        $(pub const $name: ChunkId = ChunkId::new($tag);)*
    };
}

chunk_ids! {
    BAR0 = b"BAR0"; // archive root marker
    SALT = b"SALT"; // per-archive KDF salt
    KEY  = b"KEY ";  // asymmetric-wrapped symmetric key
    META = b"META"; // archive-level metadata
    FILE = b"FILE"; // regular file entry root
    IMAG = b"IMAG"; // block device image entry root
    DIR_ = b"DIR "; // directory entry root
    LINK = b"LINK"; // symlink entry root
    HLNK = b"HLNK"; // hard link entry root
    SPEC = b"SPEC"; // special file entry root (fifo/socket/device)
    ENTR = b"ENTR"; // entry attributes
    XATR = b"XATR"; // extended attribute
    DELT = b"DELT"; // delta-source reference
    DATA = b"DATA"; // file fragment
    BLK_ = b"BLK "; // image block run
    DEST = b"DEST"; // symlink target
    HNAM = b"HNAM"; // additional hard-link name
    SIGN = b"SIGN"; // trailing signature
    XXXX = b"XXXX"; // reserved for forward-compatibility tests
}

/// Write strategy selected by the engine according to the backend's
/// `random_access_write` capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Backpatch the length field after the payload is written.
    Seekable,
    /// Buffer the whole payload, then emit header+payload in one pass.
    Streaming,
}

/// Streaming chunk writer: `begin_chunk` / write payload bytes / `end_chunk`.
///
/// Only one chunk may be open (via `begin_chunk`) at a time per writer
/// instance; nested chunks are composed by opening a child writer that wraps
/// the same underlying sink while the parent is buffering (streaming mode)
/// or by writing directly (seekable mode, where nested lengths are patched
/// independently because each carries its own offset).
pub struct ChunkWriter<W> {
    inner: W,
    strategy: WriteStrategy,
    /// Streaming-mode open chunk: (id, buffered payload).
    open: Option<(ChunkId, Vec<u8>)>,
    /// Seekable-mode open chunk: (id, header offset).
    open_seekable: Option<(ChunkId, u64)>,
}

impl<W: Write> ChunkWriter<W> {
    pub fn new(inner: W, strategy: WriteStrategy) -> Self {
        Self { inner, strategy, open: None, open_seekable: None }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Write a complete, already-assembled chunk (no streaming payload).
    pub fn write_chunk(&mut self, id: ChunkId, payload: &[u8]) -> ChunkResult<()> {
        self.inner.write_all(&id.0)?;
        self.inner.write_all(&(payload.len() as u64).to_be_bytes())?;
        self.inner.write_all(payload)?;
        Ok(())
    }
}

impl<W: Write + Seek> ChunkWriter<W> {
    /// Begin a chunk whose payload is written incrementally. Must be paired
    /// with `end_chunk`. Only valid when `strategy == Seekable`.
    pub fn begin_chunk(&mut self, id: ChunkId) -> ChunkResult<()> {
        debug_assert_eq!(self.strategy, WriteStrategy::Seekable);
        let offset = self.inner.stream_position()?;
        self.inner.write_all(&id.0)?;
        self.inner.write_all(&0u64.to_be_bytes())?; // placeholder, patched on end_chunk
        self.open_seekable = Some((id, offset));
        Ok(())
    }

    /// Append payload bytes to the currently open seekable chunk.
    pub fn write_payload(&mut self, bytes: &[u8]) -> ChunkResult<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    /// Close the chunk opened with `begin_chunk`, patching its length.
    pub fn end_chunk(&mut self) -> ChunkResult<()> {
        let (_, header_offset) = self
            .open_seekable
            .take()
            .expect("end_chunk called without matching begin_chunk");
        let end = self.inner.stream_position()?;
        let payload_len = end - header_offset - CHUNK_HEADER_SIZE as u64;
        self.inner.seek(SeekFrom::Start(header_offset + 4))?;
        self.inner.write_all(&payload_len.to_be_bytes())?;
        self.inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

impl<W: Write> ChunkWriter<W> {
    /// Begin a chunk in streaming (forward-only) mode: payload is buffered
    /// in memory until `end_chunk_streaming` computes its length.
    pub fn begin_chunk_streaming(&mut self, id: ChunkId) {
        self.open = Some((id, Vec::new()));
    }

    pub fn write_payload_streaming(&mut self, bytes: &[u8]) {
        self.open
            .as_mut()
            .expect("write_payload_streaming called without begin_chunk_streaming")
            .1
            .extend_from_slice(bytes);
    }

    pub fn end_chunk_streaming(&mut self) -> ChunkResult<()> {
        let (id, payload) = self
            .open
            .take()
            .expect("end_chunk_streaming called without matching begin_chunk_streaming");
        self.write_chunk(id, &payload)
    }
}

/// Header of one chunk: identifier plus declared payload length.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    pub id: ChunkId,
    pub length: u64,
}

/// Restartable chunk reader. Restart points are chunk boundaries only.
pub struct ChunkReader<R> {
    inner: R,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Read the next chunk's header. Returns `Truncated` on short read,
    /// including a clean EOF (zero bytes read) which the engine treats as
    /// "no more chunks" rather than an error at the top level.
    pub fn read_header(&mut self) -> ChunkResult<Option<ChunkHeader>> {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        let mut read = 0;
        while read < buf.len() {
            let n = self.inner.read(&mut buf[read..])?;
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(ChunkError::Truncated { expected: buf.len() - read });
            }
            read += n;
        }
        let id = ChunkId([buf[0], buf[1], buf[2], buf[3]]);
        let length = u64::from_be_bytes(buf[4..12].try_into().unwrap());
        Ok(Some(ChunkHeader { id, length }))
    }

    /// Read exactly `length` bytes of payload.
    pub fn read_payload(&mut self, length: u64) -> ChunkResult<Vec<u8>> {
        let mut buf = vec![0u8; length as usize];
        self.inner
            .read_exact(&mut buf)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => ChunkError::Truncated { expected: length as usize },
                _ => ChunkError::Io(e),
            })?;
        Ok(buf)
    }

    /// Skip exactly `length` bytes regardless of payload interpretation.
    /// This is how forward compatibility is maintained for unknown chunks.
    pub fn skip_chunk(&mut self, length: u64) -> ChunkResult<()>
    where
        R: Read,
    {
        let mut remaining = length;
        let mut scratch = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            let n = self.inner.read(&mut scratch[..want])?;
            if n == 0 {
                return Err(ChunkError::Truncated { expected: remaining as usize });
            }
            remaining -= n as u64;
        }
        Ok(())
    }
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Seek past the current chunk's payload using `Seek` rather than
    /// reading and discarding — preferred when the underlying stream
    /// supports random access.
    pub fn seek_past(&mut self, length: u64) -> ChunkResult<()> {
        self.inner.seek(SeekFrom::Current(length as i64))?;
        Ok(())
    }

    /// Seek to the absolute end of the stream (used to append `SIGN` or to
    /// locate the current write position when reopening an archive).
    pub fn seek_to_end(&mut self) -> ChunkResult<u64> {
        Ok(self.inner.seek(SeekFrom::End(0))?)
    }

    pub fn stream_position(&mut self) -> ChunkResult<u64> {
        Ok(self.inner.stream_position()?)
    }
}

/// A child-chunk tree-totality check: read children of a parent payload of
/// `parent_len` bytes from `cursor`, calling `f` for each; fails with
/// `Overrun` if a child's declared length would exceed the parent's bound.
pub fn for_each_child<R, F>(
    reader: &mut ChunkReader<R>,
    parent_len: u64,
    mut f: F,
) -> ChunkResult<()>
where
    R: Read,
    F: FnMut(&mut ChunkReader<R>, ChunkHeader) -> ChunkResult<()>,
{
    let mut consumed = 0u64;
    while consumed < parent_len {
        let header = reader
            .read_header()?
            .ok_or(ChunkError::Truncated { expected: CHUNK_HEADER_SIZE })?;
        let remaining = parent_len - consumed;
        if header.length > remaining {
            return Err(ChunkError::Overrun { declared: header.length, remaining });
        }
        consumed += CHUNK_HEADER_SIZE as u64 + header.length;
        f(reader, header)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_chunk_then_read_header_and_payload() {
        let mut buf = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut buf, WriteStrategy::Streaming);
            w.write_chunk(DATA, b"hello, world!").unwrap();
        }
        let mut r = ChunkReader::new(Cursor::new(buf));
        let h = r.read_header().unwrap().unwrap();
        assert_eq!(h.id, DATA);
        assert_eq!(h.length, 13);
        let payload = r.read_payload(h.length).unwrap();
        assert_eq!(payload, b"hello, world!");
        assert!(r.read_header().unwrap().is_none());
    }

    #[test]
    fn seekable_begin_end_chunk_patches_length() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut w = ChunkWriter::new(&mut cursor, WriteStrategy::Seekable);
            w.begin_chunk(META).unwrap();
            w.write_payload(b"abc").unwrap();
            w.write_payload(b"def").unwrap();
            w.end_chunk().unwrap();
        }
        let mut r = ChunkReader::new(Cursor::new(cursor.into_inner()));
        let h = r.read_header().unwrap().unwrap();
        assert_eq!(h.id, META);
        assert_eq!(h.length, 6);
        assert_eq!(r.read_payload(h.length).unwrap(), b"abcdef");
    }

    #[test]
    fn skip_chunk_advances_exactly_length_bytes() {
        let mut buf = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut buf, WriteStrategy::Streaming);
            w.write_chunk(XXXX, &[0xAAu8; 32]).unwrap();
            w.write_chunk(DATA, b"after").unwrap();
        }
        let mut r = ChunkReader::new(Cursor::new(buf));
        let h = r.read_header().unwrap().unwrap();
        assert_eq!(h.id, XXXX);
        r.skip_chunk(h.length).unwrap();
        let h2 = r.read_header().unwrap().unwrap();
        assert_eq!(h2.id, DATA);
        assert_eq!(r.read_payload(h2.length).unwrap(), b"after");
    }

    #[test]
    fn truncated_header_is_an_error_not_panic() {
        let mut r = ChunkReader::new(Cursor::new(vec![b'D', b'A']));
        let err = r.read_header().unwrap_err();
        assert!(matches!(err, ChunkError::Truncated { .. }));
    }

    #[test]
    fn for_each_child_detects_overrun() {
        let mut buf = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut buf, WriteStrategy::Streaming);
            // Child declares 100 bytes but parent only allows 10.
            w.write_chunk(ENTR, &[0u8; 100]).unwrap();
        }
        let mut r = ChunkReader::new(Cursor::new(buf));
        let result = for_each_child(&mut r, 10, |_, _| Ok(()));
        assert!(matches!(result, Err(ChunkError::Overrun { .. })));
    }
}
