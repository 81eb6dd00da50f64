//! Byte compression: the second stage of the fragment pipeline,
//! applied after an optional delta stage (`compress::delta`).
//!
//! # Streaming contract
//! `push`/`pull`/`finish`/`reset` generalize a one-shot
//! `compress`/`decompress` call into an incremental
//! contract: callers push plaintext (or ciphertext, when decoding) in
//! fragment-sized increments, call `finish` once input is exhausted, and
//! drain output via repeated `pull` until it returns `0`. Every built-in
//! algorithm here buffers internally and runs its one-shot transform at
//! `finish` — `pull` before `finish` always returns `0` — because none of
//! the underlying crates expose true incremental streaming with a stable
//! flush point; that restriction is the honest cost of this design choice,
//! not an oversight.

pub mod delta;

use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("{0:?} has no decoder/encoder available in this build")]
    Unsupported(ByteAlgorithm),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CompressResult<T> = Result<T, CompressError>;

/// Byte compressors a `META` chunk's compression-algorithm byte may name.
/// Discriminants are on-wire and frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum ByteAlgorithm {
    None = 0,
    Zip = 1,
    Bzip2 = 2,
    Lzma = 3,
    Xz = 4,
    Lzo = 5,
    Lz4 = 6,
    Zstd = 7,
}

impl ByteAlgorithm {
    pub fn from_wire(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => ByteAlgorithm::None,
            1 => ByteAlgorithm::Zip,
            2 => ByteAlgorithm::Bzip2,
            3 => ByteAlgorithm::Lzma,
            4 => ByteAlgorithm::Xz,
            5 => ByteAlgorithm::Lzo,
            6 => ByteAlgorithm::Lz4,
            7 => ByteAlgorithm::Zstd,
            _ => return None,
        })
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Incremental byte compressor/decompressor.
pub trait ByteCompressor: Send {
    /// Buffer `data` for later transformation. Returns the number of bytes
    /// accepted (always all of `data` for the built-ins here).
    fn push(&mut self, data: &[u8]) -> CompressResult<usize>;
    /// Drain up to `buf.len()` transformed bytes into `buf`. Returns `0`
    /// once all output has been drained.
    fn pull(&mut self, buf: &mut [u8]) -> CompressResult<usize>;
    /// Signal that no more input will be pushed; runs the transform.
    fn finish(&mut self) -> CompressResult<()>;
    /// Discard all buffered state, returning to a freshly-constructed state.
    fn reset(&mut self);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Compress { level: i32 },
    Decompress,
}

/// Buffer-then-transform implementation shared by every built-in algorithm
/// except `Lzo` (unsupported) and `None` (identity, no buffering needed).
struct BufferedCompressor {
    algo: ByteAlgorithm,
    mode: Mode,
    input: Vec<u8>,
    output: Vec<u8>,
    read_cursor: usize,
    finished: bool,
}

impl BufferedCompressor {
    fn new(algo: ByteAlgorithm, mode: Mode) -> Self {
        Self { algo, mode, input: Vec::new(), output: Vec::new(), read_cursor: 0, finished: false }
    }

    fn transform(&self) -> CompressResult<Vec<u8>> {
        match self.mode {
            Mode::Compress { level } => compress_one_shot(self.algo, &self.input, level),
            Mode::Decompress => decompress_one_shot(self.algo, &self.input),
        }
    }
}

impl ByteCompressor for BufferedCompressor {
    fn push(&mut self, data: &[u8]) -> CompressResult<usize> {
        self.input.extend_from_slice(data);
        Ok(data.len())
    }

    fn pull(&mut self, buf: &mut [u8]) -> CompressResult<usize> {
        if !self.finished {
            return Ok(0);
        }
        let available = self.output.len() - self.read_cursor;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.output[self.read_cursor..self.read_cursor + n]);
        self.read_cursor += n;
        Ok(n)
    }

    fn finish(&mut self) -> CompressResult<()> {
        if !self.finished {
            self.output = self.transform()?;
            self.finished = true;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.read_cursor = 0;
        self.finished = false;
    }
}

/// Identity compressor for `ByteAlgorithm::None` — streams through without
/// buffering the whole payload.
#[derive(Default)]
struct IdentityCompressor {
    queued: std::collections::VecDeque<u8>,
}

impl ByteCompressor for IdentityCompressor {
    fn push(&mut self, data: &[u8]) -> CompressResult<usize> {
        self.queued.extend(data.iter().copied());
        Ok(data.len())
    }

    fn pull(&mut self, buf: &mut [u8]) -> CompressResult<usize> {
        let n = buf.len().min(self.queued.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.queued.pop_front().unwrap();
        }
        Ok(n)
    }

    fn finish(&mut self) -> CompressResult<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.queued.clear();
    }
}

/// A compressor that always fails — `ByteAlgorithm::Lzo` has no maintained
/// pure-Rust crate available to this build, so it's named but unsupported
/// rather than silently aliased to another algorithm.
struct UnsupportedCompressor(ByteAlgorithm);

impl ByteCompressor for UnsupportedCompressor {
    fn push(&mut self, _data: &[u8]) -> CompressResult<usize> {
        Err(CompressError::Unsupported(self.0))
    }
    fn pull(&mut self, _buf: &mut [u8]) -> CompressResult<usize> {
        Err(CompressError::Unsupported(self.0))
    }
    fn finish(&mut self) -> CompressResult<()> {
        Err(CompressError::Unsupported(self.0))
    }
    fn reset(&mut self) {}
}

/// Construct an encoder for `algo` at the given compression level (ignored
/// by algorithms without a tunable level).
pub fn encoder(algo: ByteAlgorithm, level: i32) -> Box<dyn ByteCompressor> {
    match algo {
        ByteAlgorithm::None => Box::new(IdentityCompressor::default()),
        ByteAlgorithm::Lzo => Box::new(UnsupportedCompressor(algo)),
        _ => Box::new(BufferedCompressor::new(algo, Mode::Compress { level })),
    }
}

/// Construct a decoder for `algo`.
pub fn decoder(algo: ByteAlgorithm) -> Box<dyn ByteCompressor> {
    match algo {
        ByteAlgorithm::None => Box::new(IdentityCompressor::default()),
        ByteAlgorithm::Lzo => Box::new(UnsupportedCompressor(algo)),
        _ => Box::new(BufferedCompressor::new(algo, Mode::Decompress)),
    }
}

fn compress_one_shot(algo: ByteAlgorithm, data: &[u8], level: i32) -> CompressResult<Vec<u8>> {
    match algo {
        ByteAlgorithm::None | ByteAlgorithm::Lzo => unreachable!("handled by dedicated types"),
        ByteAlgorithm::Zip => {
            let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.clamp(0, 9) as u32));
            encoder.write_all(data).map_err(|e| CompressError::Compression(e.to_string()))?;
            encoder.finish().map_err(|e| CompressError::Compression(e.to_string()))
        }
        ByteAlgorithm::Bzip2 => {
            let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(level.clamp(1, 9) as u32));
            encoder.write_all(data).map_err(|e| CompressError::Compression(e.to_string()))?;
            encoder.finish().map_err(|e| CompressError::Compression(e.to_string()))
        }
        ByteAlgorithm::Lzma => {
            let mut out = Vec::new();
            lzma_rs::lzma_compress(&mut std::io::Cursor::new(data), &mut out)
                .map_err(|e| CompressError::Compression(e.to_string()))?;
            Ok(out)
        }
        ByteAlgorithm::Xz => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), level.clamp(0, 9) as u32);
            encoder.write_all(data).map_err(|e| CompressError::Compression(e.to_string()))?;
            encoder.finish().map_err(|e| CompressError::Compression(e.to_string()))
        }
        ByteAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        ByteAlgorithm::Zstd => {
            zstd::encode_all(data, level).map_err(|e| CompressError::Compression(e.to_string()))
        }
    }
}

fn decompress_one_shot(algo: ByteAlgorithm, data: &[u8]) -> CompressResult<Vec<u8>> {
    match algo {
        ByteAlgorithm::None | ByteAlgorithm::Lzo => unreachable!("handled by dedicated types"),
        ByteAlgorithm::Zip => {
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| CompressError::Decompression(e.to_string()))?;
            Ok(out)
        }
        ByteAlgorithm::Bzip2 => {
            let mut decoder = bzip2::read::BzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| CompressError::Decompression(e.to_string()))?;
            Ok(out)
        }
        ByteAlgorithm::Lzma => {
            let mut out = Vec::new();
            lzma_rs::lzma_decompress(&mut std::io::Cursor::new(data), &mut out)
                .map_err(|e| CompressError::Decompression(e.to_string()))?;
            Ok(out)
        }
        ByteAlgorithm::Xz => {
            let mut decoder = xz2::read::XzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| CompressError::Decompression(e.to_string()))?;
            Ok(out)
        }
        ByteAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CompressError::Decompression(e.to_string())),
        ByteAlgorithm::Zstd => {
            zstd::decode_all(data).map_err(|e| CompressError::Decompression(e.to_string()))
        }
    }
}

fn pull_all(c: &mut dyn ByteCompressor) -> CompressResult<Vec<u8>> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(algo: ByteAlgorithm) {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(64);
        let mut enc = encoder(algo, 6);
        enc.push(&data).unwrap();
        enc.finish().unwrap();
        let compressed = pull_all(enc.as_mut()).unwrap();

        let mut dec = decoder(algo);
        dec.push(&compressed).unwrap();
        dec.finish().unwrap();
        let decompressed = pull_all(dec.as_mut()).unwrap();

        assert_eq!(decompressed, data);
    }

    #[test]
    fn roundtrip_all_supported_algorithms() {
        for algo in [
            ByteAlgorithm::None,
            ByteAlgorithm::Zip,
            ByteAlgorithm::Bzip2,
            ByteAlgorithm::Lzma,
            ByteAlgorithm::Xz,
            ByteAlgorithm::Lz4,
            ByteAlgorithm::Zstd,
        ] {
            roundtrip(algo);
        }
    }

    #[test]
    fn lzo_is_always_unsupported() {
        let mut enc = encoder(ByteAlgorithm::Lzo, 0);
        assert!(matches!(enc.push(b"x"), Err(CompressError::Unsupported(ByteAlgorithm::Lzo))));
    }

    #[test]
    fn reset_clears_buffered_state() {
        let mut enc = encoder(ByteAlgorithm::Zstd, 3);
        enc.push(b"some data").unwrap();
        enc.finish().unwrap();
        enc.reset();
        enc.push(b"other data").unwrap();
        enc.finish().unwrap();
        let out = pull_all(enc.as_mut()).unwrap();
        let mut dec = decoder(ByteAlgorithm::Zstd);
        dec.push(&out).unwrap();
        dec.finish().unwrap();
        assert_eq!(pull_all(dec.as_mut()).unwrap(), b"other data");
    }

    #[test]
    fn wire_roundtrip_covers_all_discriminants() {
        for b in 0..=7u8 {
            let a = ByteAlgorithm::from_wire(b).unwrap();
            assert_eq!(a.to_wire(), b);
        }
        assert!(ByteAlgorithm::from_wire(8).is_none());
    }
}
