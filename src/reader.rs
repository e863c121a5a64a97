//! Pull parser over a fully buffered protobuf-style message.

use crate::buffer::WireBuffer;
use crate::{varint, MalformedInput, Result};
use bytes::Bytes;
use std::fmt;

/// Largest field number representable in a protobuf tag.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// The low three bits of a tag.
///
/// Groups (3 and 4) are not part of this format and parse as malformed input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    Delimited = 2,
    Fixed32 = 5,
}

impl WireType {
    /// Interprets the low three bits of a tag.
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::Delimited),
            5 => Ok(WireType::Fixed32),
            other => Err(MalformedInput::UnknownWireType(other).into()),
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::Varint => "varint",
            WireType::Fixed64 => "fixed64",
            WireType::Delimited => "length-delimited",
            WireType::Fixed32 => "fixed32",
        };
        f.write_str(name)
    }
}

/// Builds the tag value `(number << 3) | wire_type`.
pub fn tag(number: u32, wire_type: WireType) -> u64 {
    (u64::from(number) << 3) | wire_type as u64
}

/// Payload of a parsed field, by position.
///
/// A delimited payload is described by its offsets and is *not* consumed by
/// [`WireReader::next_event`]: the caller either enters it as a nested frame,
/// takes it with [`WireReader::take`], or skips it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Delimited { start: usize, len: usize },
}

impl Payload {
    pub fn wire_type(&self) -> WireType {
        match self {
            Payload::Varint(_) => WireType::Varint,
            Payload::Fixed64(_) => WireType::Fixed64,
            Payload::Fixed32(_) => WireType::Fixed32,
            Payload::Delimited { .. } => WireType::Delimited,
        }
    }
}

/// One `(field number, payload)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub number: u32,
    pub payload: Payload,
}

/// A field payload detached from the input, delimited bytes included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawPayload {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Delimited(Bytes),
}

impl RawPayload {
    pub fn wire_type(&self) -> WireType {
        match self {
            RawPayload::Varint(_) => WireType::Varint,
            RawPayload::Fixed64(_) => WireType::Fixed64,
            RawPayload::Fixed32(_) => WireType::Fixed32,
            RawPayload::Delimited(_) => WireType::Delimited,
        }
    }

    pub fn as_varint(&self) -> Result<u64> {
        match self {
            RawPayload::Varint(v) => Ok(*v),
            other => Err(unexpected(WireType::Varint, other.wire_type())),
        }
    }

    pub fn as_fixed32(&self) -> Result<u32> {
        match self {
            RawPayload::Fixed32(v) => Ok(*v),
            other => Err(unexpected(WireType::Fixed32, other.wire_type())),
        }
    }

    pub fn as_fixed64(&self) -> Result<u64> {
        match self {
            RawPayload::Fixed64(v) => Ok(*v),
            other => Err(unexpected(WireType::Fixed64, other.wire_type())),
        }
    }

    pub fn as_bytes(&self) -> Result<&Bytes> {
        match self {
            RawPayload::Delimited(bytes) => Ok(bytes),
            other => Err(unexpected(WireType::Delimited, other.wire_type())),
        }
    }

    /// Writes this payload back out as field `number`, byte for byte.
    pub fn write_field(&self, buf: &mut WireBuffer, number: u32) {
        buf.put_tag(number, self.wire_type());
        match self {
            RawPayload::Varint(v) => buf.put_varint(*v),
            RawPayload::Fixed64(v) => buf.put_fixed64(*v),
            RawPayload::Fixed32(v) => buf.put_fixed32(*v),
            RawPayload::Delimited(bytes) => buf.put_delimited(bytes),
        }
    }
}

pub(crate) fn unexpected(expected: WireType, actual: WireType) -> crate::CodecError {
    MalformedInput::UnexpectedWireType { expected, actual }.into()
}

/// Reads tags and payloads out of a [`Bytes`] region.
///
/// Every read is bounded by a caller-supplied `limit`, the end offset of the
/// frame currently being parsed.
#[derive(Clone, Debug)]
pub struct WireReader {
    data: Bytes,
    pos: usize,
    max_length: usize,
}

impl WireReader {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pos: 0,
            max_length: usize::MAX,
        }
    }

    /// Rejects delimited payloads longer than `max_length`.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying region.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Parses the next tag and its scalar payload.
    ///
    /// # Errors
    /// Malformed input on truncation, on an unknown wire type, on field number
    /// zero, or on a delimited length reaching past `limit`.
    pub fn next_event(&mut self, limit: usize) -> Result<Event> {
        let key = self.read_varint(limit)?;
        let number = key >> 3;
        if number == 0 || number > u64::from(MAX_FIELD_NUMBER) {
            return Err(MalformedInput::InvalidFieldNumber(number).into());
        }
        let payload = match WireType::from_bits((key & 0x7) as u8)? {
            WireType::Varint => Payload::Varint(self.read_varint(limit)?),
            WireType::Fixed64 => {
                let bytes = self.read_array::<8>(limit)?;
                Payload::Fixed64(u64::from_le_bytes(bytes))
            }
            WireType::Fixed32 => {
                let bytes = self.read_array::<4>(limit)?;
                Payload::Fixed32(u32::from_le_bytes(bytes))
            }
            WireType::Delimited => {
                let len = self.read_varint(limit)?;
                let len = usize::try_from(len).map_err(|_| MalformedInput::Truncated)?;
                if len > self.max_length {
                    return Err(MalformedInput::LengthExceeded {
                        found: len,
                        max: self.max_length,
                    }
                    .into());
                }
                if limit - self.pos < len {
                    return Err(MalformedInput::Truncated.into());
                }
                Payload::Delimited {
                    start: self.pos,
                    len,
                }
            }
        };
        Ok(Event {
            number: number as u32,
            payload,
        })
    }

    /// Detaches `payload`, consuming the bytes of a delimited payload.
    pub fn read_raw(&mut self, payload: Payload) -> RawPayload {
        match payload {
            Payload::Varint(v) => RawPayload::Varint(v),
            Payload::Fixed64(v) => RawPayload::Fixed64(v),
            Payload::Fixed32(v) => RawPayload::Fixed32(v),
            Payload::Delimited { start, len } => RawPayload::Delimited(self.take(start, len)),
        }
    }

    /// Returns the delimited payload at `start` (zero-copy) and moves past it.
    pub fn take(&mut self, start: usize, len: usize) -> Bytes {
        self.pos = start + len;
        self.data.slice(start..start + len)
    }

    /// Moves past whatever `payload` left unconsumed.
    pub fn skip(&mut self, payload: Payload) {
        if let Payload::Delimited { start, len } = payload {
            self.pos = start + len;
        }
    }

    fn read_varint(&mut self, limit: usize) -> Result<u64> {
        let mut window = &self.data[self.pos..limit];
        let before = window.len();
        let value = varint::read(&mut window)?;
        self.pos += before - window.len();
        Ok(value)
    }

    fn read_array<const N: usize>(&mut self, limit: usize) -> Result<[u8; N]> {
        if limit - self.pos < N {
            return Err(MalformedInput::Truncated.into());
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }
}
