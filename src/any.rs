//! Any-values: values whose concrete type travels with them.
//!
//! An any-value is an embedded message `{1: type tag, 2: payload}`. The
//! payload is whatever the concrete type's codec writes as field 2; arrays
//! and maps are wrapped first, as array elements are. A decoder that does
//! not know the tag keeps the payload bytes as a [`Deferred`] value, which
//! re-encodes to the same bytes and can be materialized once the type is
//! registered.

use crate::array::WRAPPER_FIELD;
use crate::codec::Codec;
use crate::encoder::EncodeContext;
use crate::primitive::{IntEncoding, PrimitiveCodec, PrimitiveCodecTable};
use crate::reader::{RawPayload, WireType};
use crate::types::{AccessRef, PrimitiveKind};
use crate::value::Value;
use crate::{CodecError, Result};
use std::sync::Arc;

/// Field number of the type tag.
pub const TYPE_TAG_FIELD: u32 = 1;
/// Field number of the payload.
pub const PAYLOAD_FIELD: u32 = 2;
/// Type tag of an untyped array.
pub const ARRAY_TAG: &str = "array";
/// Type tag of an untyped map.
pub const MAP_TAG: &str = "map";

pub(crate) fn type_tag_codec() -> PrimitiveCodec {
    PrimitiveCodecTable::get(PrimitiveKind::TypeTag, IntEncoding::Default)
}

/// An any-value kept in wire form because its type was unknown.
#[derive(Clone, Debug, PartialEq)]
pub struct Deferred {
    type_tag: Arc<str>,
    payload: RawPayload,
}

impl Deferred {
    pub fn new(type_tag: impl Into<Arc<str>>, payload: RawPayload) -> Self {
        Self {
            type_tag: type_tag.into(),
            payload,
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The payload exactly as it was read.
    pub fn payload(&self) -> &RawPayload {
        &self.payload
    }
}

/// Codec for interface-typed fields.
#[derive(Debug)]
pub struct AnyCodec {
    access: AccessRef,
}

impl AnyCodec {
    pub fn new(access: AccessRef) -> Self {
        Self { access }
    }

    pub fn name(&self) -> &str {
        self.access.desc().name()
    }

    pub(crate) fn encode_field(
        &self,
        ctx: &mut EncodeContext<'_>,
        number: u32,
        value: &Value,
    ) -> Result<()> {
        if let Value::Object(instance) = value {
            if let Some(id) = ctx.refs.lookup(instance) {
                ctx.buf.put_tag(number, WireType::Varint);
                ctx.buf.put_varint(id);
                return Ok(());
            }
        }
        ctx.framed(number, |ctx| self.encode_body(ctx, value))
    }

    /// Writes the tag and payload fields without an enclosing tag.
    pub(crate) fn encode_body(&self, ctx: &mut EncodeContext<'_>, value: &Value) -> Result<()> {
        if let Value::Deferred(deferred) = value {
            type_tag_codec().encode_field(
                &mut ctx.buf,
                TYPE_TAG_FIELD,
                &Value::TypeTag(deferred.type_tag().to_string()),
            )?;
            deferred.payload().write_field(&mut ctx.buf, PAYLOAD_FIELD);
            return Ok(());
        }

        let tag = value.type_tag().ok_or_else(|| {
            CodecError::Encode(format!("{} value has no type tag", self.name()))
        })?;
        let codec = ctx.resolver.resolve_tag(tag)?;
        type_tag_codec().encode_field(&mut ctx.buf, TYPE_TAG_FIELD, &Value::TypeTag(tag.to_string()))?;
        match &codec {
            Codec::Array(array) => {
                ctx.framed(PAYLOAD_FIELD, |ctx| array.encode_field(ctx, WRAPPER_FIELD, value))
            }
            other => other.encode_field(ctx, PAYLOAD_FIELD, value),
        }
    }
}
