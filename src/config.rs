//! Tunables shared by the encoder and the decoder.

/// Default size of one [`WireBuffer`](crate::buffer::WireBuffer) chunk.
pub const DEFAULT_CHUNK_CAPACITY: usize = 4096;
/// Default limit on nested frames (messages, arrays, any-values).
pub const DEFAULT_MAX_DEPTH: usize = 100;
/// Default limit on a single length-delimited payload.
pub const DEFAULT_MAX_LENGTH: usize = 64 * 1024 * 1024;

/// Configuration of a [`BinaryFormat`](crate::BinaryFormat).
///
/// # Examples
///
/// ```
/// use protoframe::Config;
///
/// let cfg = Config::default().with_chunk_capacity(256).with_max_depth(16);
/// assert_eq!(cfg.chunk_capacity, 256);
/// assert_eq!(cfg.max_depth, 16);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Bytes per encode buffer chunk. A length-prefix widening only shifts
    /// bytes inside the chunk holding the placeholder, so this bounds the cost
    /// of a backpatch.
    pub chunk_capacity: usize,
    /// Deepest accepted nesting of framed values, on encode and on decode.
    pub max_depth: usize,
    /// Largest accepted length-delimited payload when decoding.
    pub max_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            max_depth: DEFAULT_MAX_DEPTH,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

impl Config {
    /// Sets the chunk capacity (at least one byte).
    pub fn with_chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity.max(1);
        self
    }

    /// Sets the nesting limit.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the largest accepted length-delimited payload.
    pub fn with_max_length(mut self, length: usize) -> Self {
        self.max_length = length;
        self
    }
}
