//! Built-in codecs for primitive kinds.
//!
//! Three static tables map every [`PrimitiveKind`] to an encode and a decode
//! function. They differ only for integers:
//!
//! - [`IntEncoding::Default`]: plain varint. Negative numbers are
//!   sign-extended to 64 bits first, so they always take ten bytes.
//! - [`IntEncoding::Signed`] (`"protobuf:signed"`): zigzag varint. Unsigned
//!   kinds keep the plain varint.
//! - [`IntEncoding::Fixed`] (`"protobuf:fixed"`): little-endian fixed32 for
//!   kinds of 32 bits or less, fixed64 otherwise.
//!
//! Floats are always fixed-width. Strings, type tags, bytes, dates (RFC 3339,
//! UTC), UUIDs (16 raw bytes), big integers (big-endian two's complement) and
//! decimals (canonical text) are length-delimited.

use crate::buffer::WireBuffer;
use crate::reader::{unexpected, RawPayload, WireType};
use crate::types::{Hints, PrimitiveKind};
use crate::value::Value;
use crate::{varint, CodecError, MalformedInput, Result};
use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use num_bigint::BigInt;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

type EncodeFn = fn(&mut WireBuffer, &Value) -> Result<()>;
type DecodeFn = fn(&RawPayload) -> Result<Value>;

/// Integer encoding selected by field hints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntEncoding {
    Default,
    Signed,
    Fixed,
}

impl IntEncoding {
    /// `"protobuf:fixed"` wins over `"protobuf:signed"`.
    pub fn from_hints(hints: &Hints) -> Self {
        if hints.is_fixed() {
            IntEncoding::Fixed
        } else if hints.is_signed() {
            IntEncoding::Signed
        } else {
            IntEncoding::Default
        }
    }
}

/// Codec for one primitive kind in one encoding.
#[derive(Clone, Copy)]
pub struct PrimitiveCodec {
    kind: PrimitiveKind,
    encoding: IntEncoding,
    wire_type: WireType,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl fmt::Debug for PrimitiveCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveCodec")
            .field("kind", &self.kind)
            .field("encoding", &self.encoding)
            .field("wire_type", &self.wire_type)
            .finish()
    }
}

impl PrimitiveCodec {
    const fn new(
        kind: PrimitiveKind,
        encoding: IntEncoding,
        wire_type: WireType,
        encode: EncodeFn,
        decode: DecodeFn,
    ) -> Self {
        Self {
            kind,
            encoding,
            wire_type,
            encode,
            decode,
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn encoding(&self) -> IntEncoding {
        self.encoding
    }

    /// Wire type of every field this codec writes.
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// Writes `value` as field `number`.
    pub fn encode_field(&self, buf: &mut WireBuffer, number: u32, value: &Value) -> Result<()> {
        buf.put_tag(number, self.wire_type);
        (self.encode)(buf, value)
    }

    /// Decodes a payload, which must carry this codec's wire type. A double
    /// also takes a fixed32 float.
    pub fn decode(&self, raw: &RawPayload) -> Result<Value> {
        let found = raw.wire_type();
        let widened = self.kind == PrimitiveKind::F64 && found == WireType::Fixed32;
        if found != self.wire_type && !widened {
            return Err(unexpected(self.wire_type, found));
        }
        (self.decode)(raw)
    }
}

/// Lookup over the static primitive tables.
pub struct PrimitiveCodecTable;

impl PrimitiveCodecTable {
    /// The codec for `kind` under the integer encoding `hints` select.
    pub fn lookup(kind: PrimitiveKind, hints: &Hints) -> PrimitiveCodec {
        Self::get(kind, IntEncoding::from_hints(hints))
    }

    pub fn get(kind: PrimitiveKind, encoding: IntEncoding) -> PrimitiveCodec {
        let table = match encoding {
            IntEncoding::Default => &DEFAULT,
            IntEncoding::Signed => &SIGNED,
            IntEncoding::Fixed => &FIXED,
        };
        table[kind as usize]
    }
}

fn mismatch(kind: PrimitiveKind, value: &Value) -> CodecError {
    CodecError::Encode(format!("expected a {kind} value, got {value:?}"))
}

fn integer<T: TryFrom<i128>>(value: &Value, kind: PrimitiveKind) -> Result<T> {
    let wide = match value {
        Value::I8(v) => i128::from(*v),
        Value::I16(v) => i128::from(*v),
        Value::I32(v) => i128::from(*v),
        Value::I64(v) => i128::from(*v),
        Value::U8(v) => i128::from(*v),
        Value::U16(v) => i128::from(*v),
        Value::U32(v) => i128::from(*v),
        Value::U64(v) => i128::from(*v),
        other => return Err(mismatch(kind, other)),
    };
    T::try_from(wide).map_err(|_| CodecError::Encode(format!("{wide} does not fit in {kind}")))
}

fn narrow<T: TryFrom<W>, W: Copy + fmt::Display>(v: W, kind: PrimitiveKind) -> Result<T> {
    T::try_from(v).map_err(|_| {
        MalformedInput::OutOfRange {
            kind,
            value: v.to_string(),
        }
        .into()
    })
}

fn invalid(kind: PrimitiveKind, reason: impl fmt::Display) -> CodecError {
    MalformedInput::InvalidValue {
        kind,
        reason: reason.to_string(),
    }
    .into()
}

// --- integers ---
macro_rules! integer_codec {
    ($module:ident, $kind:ident, $ty:ty, $wide:ty, $fixed:ty, $bits:ty, $put_fixed:ident, $as_fixed:ident) => {
        mod $module {
            use super::*;

            pub(super) fn put_varint(buf: &mut WireBuffer, value: &Value) -> Result<()> {
                let v: $ty = integer(value, PrimitiveKind::$kind)?;
                buf.put_varint(v as $wide as u64);
                Ok(())
            }

            pub(super) fn get_varint(raw: &RawPayload) -> Result<Value> {
                narrow::<$ty, $wide>(raw.as_varint()? as $wide, PrimitiveKind::$kind)
                    .map(Value::$kind)
            }

            pub(super) fn put_fixed(buf: &mut WireBuffer, value: &Value) -> Result<()> {
                let v: $ty = integer(value, PrimitiveKind::$kind)?;
                buf.$put_fixed(v as $fixed as $bits);
                Ok(())
            }

            pub(super) fn get_fixed(raw: &RawPayload) -> Result<Value> {
                narrow::<$ty, $fixed>(raw.$as_fixed()? as $fixed, PrimitiveKind::$kind)
                    .map(Value::$kind)
            }
        }
    };
}

integer_codec!(int8, I8, i8, i64, i32, u32, put_fixed32, as_fixed32);
integer_codec!(int16, I16, i16, i64, i32, u32, put_fixed32, as_fixed32);
integer_codec!(int32, I32, i32, i64, i32, u32, put_fixed32, as_fixed32);
integer_codec!(int64, I64, i64, i64, i64, u64, put_fixed64, as_fixed64);
integer_codec!(uint8, U8, u8, u64, u32, u32, put_fixed32, as_fixed32);
integer_codec!(uint16, U16, u16, u64, u32, u32, put_fixed32, as_fixed32);
integer_codec!(uint32, U32, u32, u64, u32, u32, put_fixed32, as_fixed32);
integer_codec!(uint64, U64, u64, u64, u64, u64, put_fixed64, as_fixed64);

macro_rules! zigzag_codec {
    ($module:ident, $kind:ident, $ty:ty) => {
        mod $module {
            use super::*;

            pub(super) fn put(buf: &mut WireBuffer, value: &Value) -> Result<()> {
                let v: $ty = integer(value, PrimitiveKind::$kind)?;
                buf.put_varint(varint::zigzag(i64::from(v)));
                Ok(())
            }

            pub(super) fn get(raw: &RawPayload) -> Result<Value> {
                narrow::<$ty, i64>(varint::unzigzag(raw.as_varint()?), PrimitiveKind::$kind)
                    .map(Value::$kind)
            }
        }
    };
}

zigzag_codec!(sint8, I8, i8);
zigzag_codec!(sint16, I16, i16);
zigzag_codec!(sint32, I32, i32);
zigzag_codec!(sint64, I64, i64);

// --- bool / char / floats ---
fn put_bool(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Bool(b) => {
            buf.put_varint(u64::from(*b));
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::Bool, other)),
    }
}

fn get_bool(raw: &RawPayload) -> Result<Value> {
    Ok(Value::Bool(raw.as_varint()? != 0))
}

fn put_char(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Char(c) => {
            buf.put_varint(u64::from(*c));
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::Char, other)),
    }
}

fn get_char(raw: &RawPayload) -> Result<Value> {
    let code = raw.as_varint()?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(Value::Char)
        .ok_or_else(|| invalid(PrimitiveKind::Char, format!("{code:#x} is not a scalar value")))
}

fn put_f32(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::F32(v) => {
            buf.put_fixed32(v.to_bits());
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::F32, other)),
    }
}

fn get_f32(raw: &RawPayload) -> Result<Value> {
    Ok(Value::F32(f32::from_bits(raw.as_fixed32()?)))
}

fn put_f64(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    let v = match value {
        Value::F64(v) => *v,
        Value::F32(v) => f64::from(*v),
        other => return Err(mismatch(PrimitiveKind::F64, other)),
    };
    buf.put_fixed64(v.to_bits());
    Ok(())
}

fn get_f64(raw: &RawPayload) -> Result<Value> {
    let v = match raw {
        RawPayload::Fixed32(bits) => f64::from(f32::from_bits(*bits)),
        raw => f64::from_bits(raw.as_fixed64()?),
    };
    Ok(Value::F64(v))
}

// --- length-delimited kinds ---
fn utf8(raw: &RawPayload, kind: PrimitiveKind) -> Result<String> {
    let bytes = raw.as_bytes()?;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| invalid(kind, e))
}

fn put_string(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => {
            buf.put_delimited(s.as_bytes());
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::String, other)),
    }
}

fn get_string(raw: &RawPayload) -> Result<Value> {
    utf8(raw, PrimitiveKind::String).map(Value::String)
}

fn put_type_tag(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::TypeTag(s) => {
            buf.put_delimited(s.as_bytes());
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::TypeTag, other)),
    }
}

fn get_type_tag(raw: &RawPayload) -> Result<Value> {
    utf8(raw, PrimitiveKind::TypeTag).map(Value::TypeTag)
}

fn put_bytes(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Bytes(b) => {
            buf.put_delimited(b);
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::Bytes, other)),
    }
}

fn get_bytes(raw: &RawPayload) -> Result<Value> {
    raw.as_bytes().map(|b| Value::Bytes(Bytes::clone(b)))
}

fn put_date(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Date(d) => {
            buf.put_delimited(d.to_rfc3339_opts(SecondsFormat::AutoSi, true).as_bytes());
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::Date, other)),
    }
}

fn get_date(raw: &RawPayload) -> Result<Value> {
    let text = utf8(raw, PrimitiveKind::Date)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|d| Value::Date(d.with_timezone(&Utc)))
        .map_err(|e| invalid(PrimitiveKind::Date, e))
}

fn put_uuid(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Uuid(u) => {
            buf.put_delimited(u.as_bytes());
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::Uuid, other)),
    }
}

fn get_uuid(raw: &RawPayload) -> Result<Value> {
    Uuid::from_slice(raw.as_bytes()?)
        .map(Value::Uuid)
        .map_err(|e| invalid(PrimitiveKind::Uuid, e))
}

fn put_bigint(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::BigInt(n) => {
            buf.put_delimited(&n.to_signed_bytes_be());
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::BigInt, other)),
    }
}

fn get_bigint(raw: &RawPayload) -> Result<Value> {
    Ok(Value::BigInt(BigInt::from_signed_bytes_be(raw.as_bytes()?)))
}

fn put_decimal(buf: &mut WireBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Decimal(d) => {
            buf.put_delimited(d.to_string().as_bytes());
            Ok(())
        }
        other => Err(mismatch(PrimitiveKind::Decimal, other)),
    }
}

fn get_decimal(raw: &RawPayload) -> Result<Value> {
    let text = utf8(raw, PrimitiveKind::Decimal)?;
    BigDecimal::from_str(&text)
        .map(Value::Decimal)
        .map_err(|e| invalid(PrimitiveKind::Decimal, e))
}

// --- tables (indexed by `PrimitiveKind as usize`) ---
macro_rules! table {
    ($encoding:ident; $($kind:ident => $wire:ident, $put:expr, $get:expr;)*) => {
        [$(
            PrimitiveCodec::new(
                PrimitiveKind::$kind,
                IntEncoding::$encoding,
                WireType::$wire,
                $put,
                $get,
            ),
        )*]
    };
}

static DEFAULT: [PrimitiveCodec; 19] = table!(Default;
    Bool => Varint, put_bool, get_bool;
    I8 => Varint, int8::put_varint, int8::get_varint;
    I16 => Varint, int16::put_varint, int16::get_varint;
    I32 => Varint, int32::put_varint, int32::get_varint;
    I64 => Varint, int64::put_varint, int64::get_varint;
    U8 => Varint, uint8::put_varint, uint8::get_varint;
    U16 => Varint, uint16::put_varint, uint16::get_varint;
    U32 => Varint, uint32::put_varint, uint32::get_varint;
    U64 => Varint, uint64::put_varint, uint64::get_varint;
    F32 => Fixed32, put_f32, get_f32;
    F64 => Fixed64, put_f64, get_f64;
    Char => Varint, put_char, get_char;
    String => Delimited, put_string, get_string;
    Bytes => Delimited, put_bytes, get_bytes;
    Date => Delimited, put_date, get_date;
    Uuid => Delimited, put_uuid, get_uuid;
    BigInt => Delimited, put_bigint, get_bigint;
    Decimal => Delimited, put_decimal, get_decimal;
    TypeTag => Delimited, put_type_tag, get_type_tag;
);

static SIGNED: [PrimitiveCodec; 19] = table!(Signed;
    Bool => Varint, put_bool, get_bool;
    I8 => Varint, sint8::put, sint8::get;
    I16 => Varint, sint16::put, sint16::get;
    I32 => Varint, sint32::put, sint32::get;
    I64 => Varint, sint64::put, sint64::get;
    U8 => Varint, uint8::put_varint, uint8::get_varint;
    U16 => Varint, uint16::put_varint, uint16::get_varint;
    U32 => Varint, uint32::put_varint, uint32::get_varint;
    U64 => Varint, uint64::put_varint, uint64::get_varint;
    F32 => Fixed32, put_f32, get_f32;
    F64 => Fixed64, put_f64, get_f64;
    Char => Varint, put_char, get_char;
    String => Delimited, put_string, get_string;
    Bytes => Delimited, put_bytes, get_bytes;
    Date => Delimited, put_date, get_date;
    Uuid => Delimited, put_uuid, get_uuid;
    BigInt => Delimited, put_bigint, get_bigint;
    Decimal => Delimited, put_decimal, get_decimal;
    TypeTag => Delimited, put_type_tag, get_type_tag;
);

static FIXED: [PrimitiveCodec; 19] = table!(Fixed;
    Bool => Varint, put_bool, get_bool;
    I8 => Fixed32, int8::put_fixed, int8::get_fixed;
    I16 => Fixed32, int16::put_fixed, int16::get_fixed;
    I32 => Fixed32, int32::put_fixed, int32::get_fixed;
    I64 => Fixed64, int64::put_fixed, int64::get_fixed;
    U8 => Fixed32, uint8::put_fixed, uint8::get_fixed;
    U16 => Fixed32, uint16::put_fixed, uint16::get_fixed;
    U32 => Fixed32, uint32::put_fixed, uint32::get_fixed;
    U64 => Fixed64, uint64::put_fixed, uint64::get_fixed;
    F32 => Fixed32, put_f32, get_f32;
    F64 => Fixed64, put_f64, get_f64;
    Char => Varint, put_char, get_char;
    String => Delimited, put_string, get_string;
    Bytes => Delimited, put_bytes, get_bytes;
    Date => Delimited, put_date, get_date;
    Uuid => Delimited, put_uuid, get_uuid;
    BigInt => Delimited, put_bigint, get_bigint;
    Decimal => Delimited, put_decimal, get_decimal;
    TypeTag => Delimited, put_type_tag, get_type_tag;
);
