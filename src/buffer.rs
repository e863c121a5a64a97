//! Chunked, backpatching write buffer.
//!
//! A nested message must be preceded by its byte length, which is unknown
//! until the message has been written. [`WireBuffer::push`] therefore writes
//! the field tag followed by a single placeholder byte, betting that the
//! payload will stay under 128 bytes. [`WireBuffer::pop`] settles the bet:
//! either the length fits the placeholder, or the placeholder is widened in
//! place by splicing the full varint into the chunk that holds it. Only the
//! suffix of that chunk after the placeholder moves; later chunks are not
//! touched.
//!
//! Every open frame keeps a running count of the payload bytes written since
//! it was pushed. When a child frame closes, its *final* size (length prefix,
//! widened or not, plus payload) is credited to its parent, so a widening
//! automatically feeds into every ancestor's length when that ancestor is in
//! turn popped.

use crate::config::DEFAULT_CHUNK_CAPACITY;
use crate::reader::{self, WireType};
use crate::{varint, CodecError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// Open nested frame: where its placeholder lives and how much payload it holds.
#[derive(Clone, Copy, Debug)]
struct Frame {
    chunk: usize,
    offset: usize,
    length: usize,
}

/// Append-only byte store with a stack of open length-delimited frames.
///
/// # Examples
///
/// ```
/// use protoframe::buffer::WireBuffer;
///
/// let mut buf = WireBuffer::new();
/// buf.push(1);
/// buf.put_slice(&[0xAB; 200]);
/// buf.pop().unwrap();
/// let bytes = buf.finish().unwrap();
/// // tag, two-byte length (200), payload
/// assert_eq!(&bytes[..3], &[0x0A, 0xC8, 0x01]);
/// assert_eq!(bytes.len(), 203);
/// ```
#[derive(Debug)]
pub struct WireBuffer {
    chunks: Vec<Vec<u8>>,
    spare: Vec<Vec<u8>>,
    capacity: usize,
    // Popping leaves the slot's storage in place, so siblings reuse it.
    frames: Vec<Frame>,
    len: usize,
}

impl Default for WireBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    pub fn with_chunk_capacity(capacity: usize) -> Self {
        Self {
            chunks: Vec::new(),
            spare: Vec::new(),
            capacity: capacity.max(1),
            frames: Vec::new(),
            len: 0,
        }
    }

    /// Total bytes written, widened length prefixes included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of currently open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of chunks in use.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn put_u8(&mut self, byte: u8) {
        self.put_slice(&[byte]);
    }

    /// Appends raw bytes, spilling into fresh chunks as needed.
    pub fn put_slice(&mut self, mut data: &[u8]) {
        self.credit(data.len());
        self.len += data.len();
        while !data.is_empty() {
            let capacity = self.capacity;
            let chunk = self.current_chunk();
            let room = capacity.saturating_sub(chunk.len()).max(1);
            let n = room.min(data.len());
            chunk.extend_from_slice(&data[..n]);
            data = &data[n..];
        }
    }

    pub fn put_varint(&mut self, value: u64) {
        let mut scratch = [0u8; varint::MAX_VARINT_LEN];
        let n = varint::encode_into(value, &mut scratch);
        self.put_slice(&scratch[..n]);
    }

    pub fn put_tag(&mut self, number: u32, wire_type: WireType) {
        self.put_varint(reader::tag(number, wire_type));
    }

    pub fn put_fixed32(&mut self, value: u32) {
        self.put_slice(&value.to_le_bytes());
    }

    pub fn put_fixed64(&mut self, value: u64) {
        self.put_slice(&value.to_le_bytes());
    }

    /// Writes a varint length followed by `data`.
    pub fn put_delimited(&mut self, data: &[u8]) {
        self.put_varint(data.len() as u64);
        self.put_slice(data);
    }

    /// Opens a length-delimited field: writes its tag and reserves a one-byte
    /// length placeholder.
    pub fn push(&mut self, number: u32) {
        self.put_tag(number, WireType::Delimited);

        // The placeholder belongs to neither frame's payload until `pop`.
        let chunk = self.writable_chunk();
        let offset = self.chunks[chunk].len();
        self.chunks[chunk].push(0);
        self.len += 1;
        self.frames.push(Frame {
            chunk,
            offset,
            length: 0,
        });
    }

    /// Closes the innermost open frame, backpatching its length prefix.
    ///
    /// # Errors
    /// Returns an error when no frame is open.
    pub fn pop(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| CodecError::Encode("pop without an open frame".to_string()))?;

        let mut prefix = [0u8; varint::MAX_VARINT_LEN];
        let width = varint::encode_into(frame.length as u64, &mut prefix);
        let chunk = &mut self.chunks[frame.chunk];
        if width == 1 {
            chunk[frame.offset] = prefix[0];
        } else {
            // Widen in place: only this chunk's tail after the placeholder shifts.
            chunk.splice(frame.offset..frame.offset + 1, prefix[..width].iter().copied());
            self.len += width - 1;
            trace!(
                length = frame.length,
                width,
                chunk = frame.chunk,
                "widened length prefix"
            );
        }

        self.credit(width + frame.length);
        Ok(())
    }

    /// Concatenates the chunks into one contiguous buffer.
    ///
    /// # Errors
    /// Returns an error if a frame is still open.
    pub fn finish(self) -> Result<Bytes> {
        if !self.frames.is_empty() {
            return Err(CodecError::Encode(format!(
                "{} frame(s) left open",
                self.frames.len()
            )));
        }
        let mut out = BytesMut::with_capacity(self.len);
        for chunk in &self.chunks {
            out.put_slice(chunk);
        }
        Ok(out.freeze())
    }

    /// Discards all content, keeping chunk allocations for reuse.
    pub fn reset(&mut self) {
        for mut chunk in self.chunks.drain(..) {
            chunk.clear();
            self.spare.push(chunk);
        }
        self.frames.clear();
        self.len = 0;
    }

    fn credit(&mut self, n: usize) {
        if let Some(top) = self.frames.last_mut() {
            top.length += n;
        }
    }

    fn current_chunk(&mut self) -> &mut Vec<u8> {
        let last = self.writable_chunk();
        &mut self.chunks[last]
    }

    /// Index of the last chunk, after starting a new one if it is full.
    fn writable_chunk(&mut self) -> usize {
        let full = self
            .chunks
            .last()
            .map_or(true, |chunk| chunk.len() >= self.capacity);
        if full {
            let chunk = self
                .spare
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(self.capacity));
            self.chunks.push(chunk);
        }
        self.chunks.len() - 1
    }
}
