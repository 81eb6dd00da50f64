//! Delta compression: the first stage of the fragment pipeline,
//! rewriting a fragment as a set of copy/insert operations against a
//! previously-resolved delta-source byte stream. Choosing *which* source to
//! delta against is a caller concern; only the in-archive reference shape
//! and the transform itself are modeled here.
//!
//! `XDelta` is a from-scratch COPY/INSERT op-stream over a rolling match
//! index keyed by content-defined chunks (checksum + archive offset +
//! source size) — not binary-compatible with the real VCDIFF/xdelta3 wire
//! format, but satisfying the same streaming contract and producing a
//! deterministic, minimal-enough patch for same-family fragments (e.g.
//! successive backups of a slowly-changing file).

use super::{ByteCompressor, CompressError, CompressResult};
use std::collections::HashMap;

/// Window size, in bytes, used to seed the source match index. Shorter
/// windows find more matches at the cost of a larger index.
const BLOCK_SIZE: usize = 16;
const MIN_MATCH: usize = BLOCK_SIZE;

const OP_COPY: u8 = 0x01;
const OP_INSERT: u8 = 0x02;

/// Streaming delta transform, mirroring [`ByteCompressor`]'s shape.
pub trait DeltaCompressor: Send {
    fn push(&mut self, data: &[u8]) -> CompressResult<usize>;
    fn pull(&mut self, buf: &mut [u8]) -> CompressResult<usize>;
    fn finish(&mut self) -> CompressResult<()>;
    fn reset(&mut self);
}

/// No delta stage: payload passes through untouched.
#[derive(Default)]
pub struct NoDelta {
    queued: std::collections::VecDeque<u8>,
}

impl DeltaCompressor for NoDelta {
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

enum Direction {
    Encode,
    Decode,
}

/// XDelta: buffers the full fragment, then emits (or applies) an
/// op-stream referencing `source`.
pub struct XDelta {
    source: Vec<u8>,
    direction: Direction,
    input: Vec<u8>,
    output: Vec<u8>,
    read_cursor: usize,
    finished: bool,
}

impl XDelta {
    pub fn new_encoder(source: Vec<u8>) -> Self {
        Self { source, direction: Direction::Encode, input: Vec::new(), output: Vec::new(), read_cursor: 0, finished: false }
    }

    pub fn new_decoder(source: Vec<u8>) -> Self {
        Self { source, direction: Direction::Decode, input: Vec::new(), output: Vec::new(), read_cursor: 0, finished: false }
    }
}

impl DeltaCompressor for XDelta {
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
        if self.finished {
            return Ok(());
        }
        self.output = match self.direction {
            Direction::Encode => encode_ops(&self.source, &self.input),
            Direction::Decode => apply_ops(&self.source, &self.input)?,
        };
        self.finished = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.read_cursor = 0;
        self.finished = false;
    }
}

fn index_source(source: &[u8]) -> HashMap<&[u8], usize> {
    let mut map = HashMap::new();
    if source.len() < BLOCK_SIZE {
        return map;
    }
    for offset in 0..=(source.len() - BLOCK_SIZE) {
        map.entry(&source[offset..offset + BLOCK_SIZE]).or_insert(offset);
    }
    map
}

fn encode_ops(source: &[u8], target: &[u8]) -> Vec<u8> {
    let index = index_source(source);
    let mut ops = Vec::new();
    let mut literal: Vec<u8> = Vec::new();
    let mut i = 0usize;

    let flush_literal = |literal: &mut Vec<u8>, ops: &mut Vec<u8>| {
        if literal.is_empty() {
            return;
        }
        ops.push(OP_INSERT);
        ops.extend_from_slice(&(literal.len() as u32).to_be_bytes());
        ops.extend_from_slice(literal);
        literal.clear();
    };

    while i < target.len() {
        let have_window = i + BLOCK_SIZE <= target.len();
        let hit = if have_window { index.get(&target[i..i + BLOCK_SIZE]) } else { None };
        match hit {
            Some(&src_off) => {
                let mut len = 0usize;
                while src_off + len < source.len()
                    && i + len < target.len()
                    && source[src_off + len] == target[i + len]
                {
                    len += 1;
                }
                if len >= MIN_MATCH {
                    flush_literal(&mut literal, &mut ops);
                    ops.push(OP_COPY);
                    ops.extend_from_slice(&(src_off as u64).to_be_bytes());
                    ops.extend_from_slice(&(len as u64).to_be_bytes());
                    i += len;
                    continue;
                }
                literal.push(target[i]);
                i += 1;
            }
            None => {
                literal.push(target[i]);
                i += 1;
            }
        }
    }
    flush_literal(&mut literal, &mut ops);
    ops
}

fn apply_ops(source: &[u8], ops: &[u8]) -> CompressResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while cursor < ops.len() {
        let tag = ops[cursor];
        cursor += 1;
        match tag {
            OP_COPY => {
                let off_bytes = ops
                    .get(cursor..cursor + 8)
                    .ok_or_else(|| CompressError::Decompression("truncated COPY offset".into()))?;
                let offset = u64::from_be_bytes(off_bytes.try_into().unwrap()) as usize;
                cursor += 8;
                let len_bytes = ops
                    .get(cursor..cursor + 8)
                    .ok_or_else(|| CompressError::Decompression("truncated COPY length".into()))?;
                let len = u64::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
                cursor += 8;
                let slice = source
                    .get(offset..offset + len)
                    .ok_or_else(|| CompressError::Decompression("COPY out of source bounds".into()))?;
                out.extend_from_slice(slice);
            }
            OP_INSERT => {
                let len_bytes = ops
                    .get(cursor..cursor + 4)
                    .ok_or_else(|| CompressError::Decompression("truncated INSERT length".into()))?;
                let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
                cursor += 4;
                let literal = ops
                    .get(cursor..cursor + len)
                    .ok_or_else(|| CompressError::Decompression("truncated INSERT payload".into()))?;
                out.extend_from_slice(literal);
                cursor += len;
            }
            other => return Err(CompressError::Decompression(format!("unknown delta op tag {other}"))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_all(c: &mut dyn DeltaCompressor) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = c.pull(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn xdelta_roundtrip_with_shared_prefix() {
        let source = b"the quick brown fox jumps over the lazy dog, again and again and again".to_vec();
        let target = b"the quick brown fox jumps over the lazy cat, again and again and again".to_vec();

        let mut enc = XDelta::new_encoder(source.clone());
        enc.push(&target).unwrap();
        enc.finish().unwrap();
        let ops = pull_all(&mut enc);

        let mut dec = XDelta::new_decoder(source);
        dec.push(&ops).unwrap();
        dec.finish().unwrap();
        let result = pull_all(&mut dec);

        assert_eq!(result, target);
    }

    #[test]
    fn xdelta_handles_empty_source() {
        let target = b"brand new content with no shared source".to_vec();
        let mut enc = XDelta::new_encoder(Vec::new());
        enc.push(&target).unwrap();
        enc.finish().unwrap();
        let ops = pull_all(&mut enc);

        let mut dec = XDelta::new_decoder(Vec::new());
        dec.push(&ops).unwrap();
        dec.finish().unwrap();
        assert_eq!(pull_all(&mut dec), target);
    }

    #[test]
    fn no_delta_passes_through() {
        let mut nd = NoDelta::default();
        nd.push(b"passthrough").unwrap();
        nd.finish().unwrap();
        assert_eq!(pull_all(&mut nd), b"passthrough");
    }

    #[test]
    fn reset_clears_state() {
        let mut enc = XDelta::new_encoder(b"source data".to_vec());
        enc.push(b"target one").unwrap();
        enc.finish().unwrap();
        enc.reset();
        enc.push(b"target two").unwrap();
        enc.finish().unwrap();
        let mut dec = XDelta::new_decoder(b"source data".to_vec());
        dec.push(&pull_all(&mut enc)).unwrap();
        dec.finish().unwrap();
        assert_eq!(pull_all(&mut dec), b"target two");
    }
}
