//! Entry pipeline: the per-entry state machine, fragment
//! splitting, and the plaintext -> delta? -> byte-compress? -> encrypt?
//! transform applied to every fragment before it becomes a `DATA`/`BLK`
//! chunk.

use crate::chunk::{self, ChunkId, ChunkWriter};
use crate::compress::delta::DeltaCompressor;
use crate::compress::{self, ByteAlgorithm};
use crate::crypto::ciphers::CipherError;
use crate::crypto::Cipher;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, Write};
use thiserror::Error;

use super::meta::DeltaAlgorithm;

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("entry operation invalid in state {state:?}")]
    WrongState { state: EntryState },
    #[error("entry root chunk had no ENTR child")]
    MissingAttributes,
    #[error(transparent)]
    Chunk(#[from] chunk::ChunkError),
    #[error(transparent)]
    Compress(#[from] compress::CompressError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EntryResult<T> = Result<T, EntryError>;

/// Entry root chunk kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EntryKind {
    File,
    Image,
    Dir,
    Link,
    HardLink,
    Special,
}

impl EntryKind {
    fn root_chunk_id(self) -> ChunkId {
        match self {
            EntryKind::File => chunk::FILE,
            EntryKind::Image => chunk::IMAG,
            EntryKind::Dir => chunk::DIR_,
            EntryKind::Link => chunk::LINK,
            EntryKind::HardLink => chunk::HLNK,
            EntryKind::Special => chunk::SPEC,
        }
    }

    pub fn from_root_chunk_id(id: ChunkId) -> Option<Self> {
        Some(match id {
            chunk::FILE => EntryKind::File,
            chunk::IMAG => EntryKind::Image,
            chunk::DIR_ => EntryKind::Dir,
            chunk::LINK => EntryKind::Link,
            chunk::HLNK => EntryKind::HardLink,
            chunk::SPEC => EntryKind::Special,
            _ => return None,
        })
    }
}

/// `Init -> HeaderWritten -> Fragments -> Closed`; any error pushes the
/// entry to `Aborted` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Init,
    HeaderWritten,
    Fragments,
    Closed,
    Aborted,
}

/// Filesystem attributes carried in the `ENTR` child chunk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntryAttributes {
    pub name: String,
    pub size: u64,
    pub mtime_unix: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Device number of the underlying filesystem, `st_dev`. Combined with
    /// `inode` this identifies hard-link siblings regardless of name.
    pub device: u64,
    /// Inode number, `st_ino`.
    pub inode: u64,
}

impl EntryAttributes {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let name_bytes = self.name.as_bytes();
        buf.write_u32::<BigEndian>(name_bytes.len() as u32).unwrap();
        buf.extend_from_slice(name_bytes);
        buf.write_u64::<BigEndian>(self.size).unwrap();
        buf.write_i64::<BigEndian>(self.mtime_unix).unwrap();
        buf.write_u32::<BigEndian>(self.mode).unwrap();
        buf.write_u32::<BigEndian>(self.uid).unwrap();
        buf.write_u32::<BigEndian>(self.gid).unwrap();
        buf.write_u64::<BigEndian>(self.device).unwrap();
        buf.write_u64::<BigEndian>(self.inode).unwrap();
        buf
    }

    pub fn decode(mut payload: &[u8]) -> EntryResult<Self> {
        let name_len = payload.read_u32::<BigEndian>()? as usize;
        let mut name_bytes = vec![0u8; name_len];
        payload.read_exact(&mut name_bytes)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        let size = payload.read_u64::<BigEndian>()?;
        let mtime_unix = payload.read_i64::<BigEndian>()?;
        let mode = payload.read_u32::<BigEndian>()?;
        let uid = payload.read_u32::<BigEndian>()?;
        let gid = payload.read_u32::<BigEndian>()?;
        let (device, inode) = match payload.read_u64::<BigEndian>() {
            Ok(device) => (device, payload.read_u64::<BigEndian>()?),
            Err(_) => (0, 0),
        };
        Ok(Self { name, size, mtime_unix, mode, uid, gid, device, inode })
    }
}

/// Knobs the fragment pipeline applies, resolved from `META`'s archive-wide
/// defaults.
#[derive(Clone)]
pub struct FragmentPipelineConfig {
    pub cipher: Cipher,
    pub key: Vec<u8>,
    pub byte_algorithm: ByteAlgorithm,
    pub byte_level: i32,
    pub delta_algorithm: DeltaAlgorithm,
    pub delta_source: Vec<u8>,
    pub fragment_size: u64,
}

impl FragmentPipelineConfig {
    fn forward(&self, plaintext: &[u8]) -> EntryResult<Vec<u8>> {
        let mut delta = super::meta::make_delta_encoder(self.delta_algorithm, self.delta_source.clone());
        delta.push(plaintext)?;
        delta.finish()?;
        let delta_out = pull_all_delta(delta.as_mut())?;

        let mut byte_enc = compress::encoder(self.byte_algorithm, self.byte_level);
        byte_enc.push(&delta_out)?;
        byte_enc.finish()?;
        let compressed = pull_all_byte(byte_enc.as_mut())?;

        Ok(self.cipher.encrypt(&self.key, &compressed)?)
    }

    fn reverse(&self, fragment_bytes: &[u8]) -> EntryResult<Vec<u8>> {
        let compressed = self.cipher.decrypt(&self.key, fragment_bytes)?;

        let mut byte_dec = compress::decoder(self.byte_algorithm);
        byte_dec.push(&compressed)?;
        byte_dec.finish()?;
        let delta_out = pull_all_byte(byte_dec.as_mut())?;

        let mut delta = super::meta::make_delta_decoder(self.delta_algorithm, self.delta_source.clone());
        delta.push(&delta_out)?;
        delta.finish()?;
        pull_all_delta(delta.as_mut())
    }
}

fn pull_all_byte(c: &mut dyn compress::ByteCompressor) -> EntryResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = c.pull(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

fn pull_all_delta(c: &mut dyn DeltaCompressor) -> EntryResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = c.pull(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

fn encode_fragment_chunk(offset: u64, orig_len: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + payload.len());
    buf.write_u64::<BigEndian>(offset).unwrap();
    buf.write_u64::<BigEndian>(orig_len).unwrap();
    buf.extend_from_slice(payload);
    buf
}

/// Decode a `DATA`/`BLK` chunk payload into `(offset, orig_len, payload)`.
pub fn decode_fragment_chunk(mut payload: &[u8]) -> EntryResult<(u64, u64, Vec<u8>)> {
    let offset = payload.read_u64::<BigEndian>()?;
    let orig_len = payload.read_u64::<BigEndian>()?;
    Ok((offset, orig_len, payload.to_vec()))
}

/// Drives one entry's root chunk: header then zero or more fragments, then
/// close. Generic over any seekable sink since the chunk writer itself
/// already abstracts the backend's write strategy.
pub struct EntryWriter<'w, W: Write + Seek> {
    writer: &'w mut ChunkWriter<W>,
    kind: EntryKind,
    state: EntryState,
    config: FragmentPipelineConfig,
    next_offset: u64,
}

impl<'w, W: Write + Seek> EntryWriter<'w, W> {
    pub fn begin(
        writer: &'w mut ChunkWriter<W>,
        kind: EntryKind,
        attrs: &EntryAttributes,
        config: FragmentPipelineConfig,
    ) -> EntryResult<Self> {
        writer.begin_chunk(kind.root_chunk_id())?;
        writer.begin_chunk(chunk::ENTR)?;
        writer.write_payload(&attrs.encode())?;
        writer.end_chunk()?;
        Ok(Self { writer, kind, state: EntryState::HeaderWritten, config, next_offset: 0 })
    }

    pub fn write_extended_attribute(&mut self, name: &str, value: &[u8]) -> EntryResult<()> {
        self.require_state(&[EntryState::HeaderWritten, EntryState::Fragments])?;
        let mut payload = Vec::new();
        payload.write_u32::<BigEndian>(name.len() as u32).unwrap();
        payload.extend_from_slice(name.as_bytes());
        payload.extend_from_slice(value);
        self.writer.begin_chunk(chunk::XATR)?;
        self.writer.write_payload(&payload)?;
        self.writer.end_chunk()?;
        Ok(())
    }

    /// Write one fragment of file/image data, splitting internally if
    /// `data` exceeds the configured fragment size.
    pub fn write_data(&mut self, data: &[u8]) -> EntryResult<()> {
        self.require_state(&[EntryState::HeaderWritten, EntryState::Fragments])?;
        let id = match self.kind {
            EntryKind::Image => chunk::BLK_,
            _ => chunk::DATA,
        };
        let fragment_size = self.config.fragment_size.max(1) as usize;
        for chunk_data in data.chunks(fragment_size) {
            let transformed = self.config.forward(chunk_data)?;
            let payload = encode_fragment_chunk(self.next_offset, chunk_data.len() as u64, &transformed);
            self.writer.begin_chunk(id)?;
            self.writer.write_payload(&payload)?;
            self.writer.end_chunk()?;
            self.next_offset += chunk_data.len() as u64;
        }
        self.state = EntryState::Fragments;
        Ok(())
    }

    /// Advance the logical offset without writing bytes, for a sparse gap.
    pub fn write_sparse_gap(&mut self, len: u64) -> EntryResult<()> {
        self.require_state(&[EntryState::HeaderWritten, EntryState::Fragments])?;
        self.next_offset += len;
        self.state = EntryState::Fragments;
        Ok(())
    }

    pub fn write_symlink_target(&mut self, target: &str) -> EntryResult<()> {
        self.require_state(&[EntryState::HeaderWritten])?;
        self.writer.begin_chunk(chunk::DEST)?;
        self.writer.write_payload(target.as_bytes())?;
        self.writer.end_chunk()?;
        self.state = EntryState::Fragments;
        Ok(())
    }

    /// Record the source entry this fragment stream was delta-encoded
    /// against, via a `DELT` chunk naming its name and original size.
    pub fn write_delta_source(&mut self, source_name: &str, source_size: u64) -> EntryResult<()> {
        self.require_state(&[EntryState::HeaderWritten])?;
        let mut payload = Vec::new();
        payload.write_u32::<BigEndian>(source_name.len() as u32).unwrap();
        payload.extend_from_slice(source_name.as_bytes());
        payload.write_u64::<BigEndian>(source_size).unwrap();
        self.writer.begin_chunk(chunk::DELT)?;
        self.writer.write_payload(&payload)?;
        self.writer.end_chunk()?;
        Ok(())
    }

    pub fn add_hardlink_name(&mut self, name: &str) -> EntryResult<()> {
        self.require_state(&[EntryState::HeaderWritten, EntryState::Fragments])?;
        self.writer.begin_chunk(chunk::HNAM)?;
        self.writer.write_payload(name.as_bytes())?;
        self.writer.end_chunk()?;
        self.state = EntryState::Fragments;
        Ok(())
    }

    pub fn close(mut self) -> EntryResult<()> {
        self.require_state(&[EntryState::HeaderWritten, EntryState::Fragments])?;
        self.writer.end_chunk()?;
        self.state = EntryState::Closed;
        Ok(())
    }

    /// Abandon the entry after an unrecoverable error. The caller
    /// (`archive::engine`) decides whether the backend supports truncating
    /// back to the root chunk's start or must instead mark the whole
    /// archive invalid.
    pub fn abort(mut self) {
        self.state = EntryState::Aborted;
    }

    fn require_state(&self, allowed: &[EntryState]) -> EntryResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EntryError::WrongState { state: self.state })
        }
    }
}

/// Reverse-transform a fragment chunk payload back into plaintext bytes.
pub fn decode_fragment(config: &FragmentPipelineConfig, payload: &[u8]) -> EntryResult<(u64, Vec<u8>)> {
    let (offset, orig_len, transformed) = decode_fragment_chunk(payload)?;
    let plaintext = config.reverse(&transformed)?;
    debug_assert_eq!(plaintext.len() as u64, orig_len);
    Ok((offset, plaintext))
}

/// Decode a `DELT` chunk payload into `(source_name, source_size)`.
pub fn decode_delta_source(mut payload: &[u8]) -> EntryResult<(String, u64)> {
    let name_len = payload.read_u32::<BigEndian>()? as usize;
    let mut name_bytes = vec![0u8; name_len];
    payload.read_exact(&mut name_bytes)?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();
    let size = payload.read_u64::<BigEndian>()?;
    Ok((name, size))
}

/// One fully decoded entry: attributes plus whichever children were present.
/// `data` holds the reassembled, reverse-transformed fragment bytes only
/// when the entry was read with `aggregate = true`; otherwise it is `None`
/// and only `fragment_count`/`total_len` describe the fragment stream.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub kind: EntryKind,
    pub attrs: EntryAttributes,
    pub extended_attributes: Vec<(String, Vec<u8>)>,
    pub symlink_target: Option<String>,
    pub hardlink_names: Vec<String>,
    pub delta_source: Option<(String, u64)>,
    pub fragment_count: usize,
    pub total_len: u64,
    /// Sum of each fragment's on-disk (post-transform) byte length.
    pub compressed_len: u64,
    pub data: Option<Vec<u8>>,
}

/// Sequential entry-at-a-time reader over an archive's root chunk stream,
/// exposing `next_entry`/`read_entry(aggregate)`/`skip_entry`/`eof`. Shared
/// by extraction and listing so both decode `DEST`/`HNAM`/`DELT`/`XATR` the
/// same way instead of re-deriving the chunk-walk independently.
pub struct EntryReader<'r, R> {
    reader: &'r mut crate::chunk::ChunkReader<R>,
    pending: Option<crate::chunk::ChunkHeader>,
    eof: bool,
}

impl<'r, R: Read> EntryReader<'r, R> {
    pub fn new(reader: &'r mut crate::chunk::ChunkReader<R>) -> Self {
        Self { reader, pending: None, eof: false }
    }

    /// Advance to the next top-level entry root chunk, if any, transparently
    /// skipping non-entry top-level chunks (e.g. a trailing `SIGN`). Returns
    /// `false` once the stream is exhausted; `eof()` then reports `true`.
    pub fn next_entry(&mut self) -> EntryResult<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        loop {
            match self.reader.read_header()? {
                Some(header) if EntryKind::from_root_chunk_id(header.id).is_some() => {
                    self.pending = Some(header);
                    return Ok(true);
                }
                Some(header) => {
                    self.reader.skip_chunk(header.length)?;
                }
                None => {
                    self.eof = true;
                    return Ok(false);
                }
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Discard the entry `next_entry` positioned on without decoding it.
    pub fn skip_entry(&mut self) -> EntryResult<()> {
        let header = self.pending.take().expect("skip_entry called without next_entry");
        self.reader.skip_chunk(header.length)?;
        Ok(())
    }

    /// Decode the entry `next_entry` positioned on. When `aggregate` is
    /// `false`, fragment payloads are still read and counted (so length and
    /// fragment-count are always accurate) but not reverse-transformed —
    /// the cheaper path a plain listing wants.
    pub fn read_entry(&mut self, config: &FragmentPipelineConfig, aggregate: bool) -> EntryResult<EntryRecord> {
        let header = self.pending.take().expect("read_entry called without next_entry");
        let kind = EntryKind::from_root_chunk_id(header.id).ok_or(chunk::ChunkError::Unexpected { id: header.id })?;

        let mut attrs = None;
        let mut extended_attributes = Vec::new();
        let mut symlink_target = None;
        let mut hardlink_names = Vec::new();
        let mut delta_source = None;
        let mut fragments: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut total_len = 0u64;
        let mut compressed_len = 0u64;

        let mut consumed = 0u64;
        while consumed < header.length {
            let child = self
                .reader
                .read_header()?
                .ok_or(chunk::ChunkError::Truncated { expected: chunk::CHUNK_HEADER_SIZE })?;
            consumed += chunk::CHUNK_HEADER_SIZE as u64 + child.length;
            match child.id {
                chunk::ENTR => {
                    let payload = self.reader.read_payload(child.length)?;
                    attrs = Some(EntryAttributes::decode(&payload)?);
                }
                chunk::XATR => {
                    let payload = self.reader.read_payload(child.length)?;
                    let mut cursor: &[u8] = &payload;
                    let name_len = cursor.read_u32::<BigEndian>()? as usize;
                    let mut name_bytes = vec![0u8; name_len];
                    cursor.read_exact(&mut name_bytes)?;
                    let name = String::from_utf8_lossy(&name_bytes).into_owned();
                    extended_attributes.push((name, cursor.to_vec()));
                }
                chunk::DELT => {
                    let payload = self.reader.read_payload(child.length)?;
                    delta_source = Some(decode_delta_source(&payload)?);
                }
                chunk::DEST => {
                    let payload = self.reader.read_payload(child.length)?;
                    symlink_target = Some(String::from_utf8_lossy(&payload).into_owned());
                }
                chunk::HNAM => {
                    let payload = self.reader.read_payload(child.length)?;
                    hardlink_names.push(String::from_utf8_lossy(&payload).into_owned());
                }
                chunk::DATA | chunk::BLK_ => {
                    let payload = self.reader.read_payload(child.length)?;
                    let (offset, orig_len, transformed) = decode_fragment_chunk(&payload)?;
                    total_len += orig_len;
                    compressed_len += transformed.len() as u64;
                    if aggregate {
                        let plaintext = config.reverse(&transformed)?;
                        fragments.push((offset, plaintext));
                    } else {
                        fragments.push((offset, Vec::new()));
                    }
                }
                _ => {
                    self.reader.skip_chunk(child.length)?;
                }
            }
        }

        let attrs = attrs.ok_or(EntryError::MissingAttributes)?;
        let fragment_count = fragments.len();
        let data = if aggregate {
            fragments.sort_by_key(|(offset, _)| *offset);
            let mut buf = Vec::new();
            for (_, plaintext) in &fragments {
                buf.extend_from_slice(plaintext);
            }
            Some(buf)
        } else {
            None
        };

        Ok(EntryRecord {
            kind,
            attrs,
            extended_attributes,
            symlink_target,
            hardlink_names,
            delta_source,
            fragment_count,
            total_len,
            compressed_len,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkReader, WriteStrategy};
    use std::io::Cursor;

    fn plain_config() -> FragmentPipelineConfig {
        FragmentPipelineConfig {
            cipher: Cipher::None,
            key: Vec::new(),
            byte_algorithm: ByteAlgorithm::Zstd,
            byte_level: 3,
            delta_algorithm: DeltaAlgorithm::None,
            delta_source: Vec::new(),
            fragment_size: 1024,
        }
    }

    #[test]
    fn write_and_read_back_one_file_entry() {
        let mut backing = Cursor::new(Vec::new());
        let data = b"hello entry pipeline, this is fragment content".to_vec();
        {
            let mut writer = ChunkWriter::new(&mut backing, WriteStrategy::Seekable);
            let attrs = EntryAttributes {
                name: "greeting.txt".to_string(),
                size: data.len() as u64,
                mtime_unix: 1_700_000_000,
                mode: 0o644,
                uid: 1000,
                gid: 1000,
                device: 0,
                inode: 0,
            };
            let mut entry = EntryWriter::begin(&mut writer, EntryKind::File, &attrs, plain_config()).unwrap();
            entry.write_data(&data).unwrap();
            entry.close().unwrap();
        }

        let mut reader = ChunkReader::new(Cursor::new(backing.into_inner()));
        let header = reader.read_header().unwrap().unwrap();
        assert_eq!(header.id, chunk::FILE);
        let mut consumed = 0u64;
        let mut collected = Vec::new();
        let mut seen_attrs = None;
        while consumed < header.length {
            let child = reader.read_header().unwrap().unwrap();
            let payload = reader.read_payload(child.length).unwrap();
            consumed += chunk::CHUNK_HEADER_SIZE as u64 + child.length;
            if child.id == chunk::ENTR {
                seen_attrs = Some(EntryAttributes::decode(&payload).unwrap());
            } else if child.id == chunk::DATA {
                let (offset, plaintext) = decode_fragment(&plain_config(), &payload).unwrap();
                assert_eq!(offset, 0);
                collected = plaintext;
            }
        }
        assert_eq!(seen_attrs.unwrap().name, "greeting.txt");
        assert_eq!(collected, data);
    }

    #[test]
    fn write_data_before_begin_header_is_unreachable_by_type_state() {
        // EntryWriter::begin always writes the header, so this is really a
        // state-machine sanity check on a post-close misuse.
        let mut backing = Cursor::new(Vec::new());
        let mut writer = ChunkWriter::new(&mut backing, WriteStrategy::Seekable);
        let attrs = EntryAttributes { name: "f".into(), size: 0, mtime_unix: 0, mode: 0, uid: 0, gid: 0, device: 0, inode: 0 };
        let entry = EntryWriter::begin(&mut writer, EntryKind::File, &attrs, plain_config()).unwrap();
        entry.close().unwrap();
    }

    #[test]
    fn entry_reader_decodes_delta_source_and_extended_attribute() {
        let mut backing = Cursor::new(Vec::new());
        let data = b"delta target contents".to_vec();
        {
            let mut writer = ChunkWriter::new(&mut backing, WriteStrategy::Seekable);
            let attrs = EntryAttributes {
                name: "derived.txt".into(),
                size: data.len() as u64,
                mtime_unix: 1_700_000_001,
                mode: 0o644,
                uid: 0,
                gid: 0,
                device: 7,
                inode: 42,
            };
            let mut entry = EntryWriter::begin(&mut writer, EntryKind::File, &attrs, plain_config()).unwrap();
            entry.write_extended_attribute("user.note", b"hi").unwrap();
            entry.write_delta_source("base.txt", 100).unwrap();
            entry.write_data(&data).unwrap();
            entry.close().unwrap();
        }

        let mut reader = ChunkReader::new(Cursor::new(backing.into_inner()));
        let mut entry_reader = EntryReader::new(&mut reader);
        assert!(entry_reader.next_entry().unwrap());
        let record = entry_reader.read_entry(&plain_config(), true).unwrap();
        assert_eq!(record.attrs.name, "derived.txt");
        assert_eq!(record.attrs.device, 7);
        assert_eq!(record.attrs.inode, 42);
        assert_eq!(record.delta_source, Some(("base.txt".to_string(), 100)));
        assert_eq!(record.extended_attributes, vec![("user.note".to_string(), b"hi".to_vec())]);
        assert_eq!(record.data.unwrap(), data);
        assert!(!entry_reader.next_entry().unwrap());
        assert!(entry_reader.eof());
    }

    #[test]
    fn entry_reader_skip_entry_advances_past_it() {
        let mut backing = Cursor::new(Vec::new());
        {
            let mut writer = ChunkWriter::new(&mut backing, WriteStrategy::Seekable);
            let attrs = EntryAttributes { name: "a".into(), size: 0, mtime_unix: 0, mode: 0, uid: 0, gid: 0, device: 0, inode: 0 };
            let entry = EntryWriter::begin(&mut writer, EntryKind::File, &attrs, plain_config()).unwrap();
            entry.close().unwrap();
            let attrs2 = EntryAttributes { name: "b".into(), size: 0, mtime_unix: 0, mode: 0, uid: 0, gid: 0, device: 0, inode: 0 };
            let entry2 = EntryWriter::begin(&mut writer, EntryKind::File, &attrs2, plain_config()).unwrap();
            entry2.close().unwrap();
        }

        let mut reader = ChunkReader::new(Cursor::new(backing.into_inner()));
        let mut entry_reader = EntryReader::new(&mut reader);
        assert!(entry_reader.next_entry().unwrap());
        entry_reader.skip_entry().unwrap();
        assert!(entry_reader.next_entry().unwrap());
        let record = entry_reader.read_entry(&plain_config(), false).unwrap();
        assert_eq!(record.attrs.name, "b");
    }
}
