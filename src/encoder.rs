//! Encoding entry point and per-call state.

use crate::array::WRAPPER_FIELD;
use crate::buffer::WireBuffer;
use crate::codec::{Codec, CodecResolver};
use crate::reference::EncodeRefs;
use crate::value::Value;
use crate::{CodecError, Result};
use bytes::Bytes;
use tracing::trace;

/// State of one encode call.
pub(crate) struct EncodeContext<'a> {
    pub(crate) resolver: &'a CodecResolver,
    pub(crate) buf: WireBuffer,
    pub(crate) refs: EncodeRefs,
    depth: usize,
}

impl<'a> EncodeContext<'a> {
    pub(crate) fn new(resolver: &'a CodecResolver) -> Self {
        Self {
            resolver,
            buf: WireBuffer::with_chunk_capacity(resolver.config().chunk_capacity),
            refs: EncodeRefs::default(),
            depth: 0,
        }
    }

    /// Writes field `number` as an embedded message whose body `body` writes.
    pub(crate) fn framed(
        &mut self,
        number: u32,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let max_depth = self.resolver.config().max_depth;
        if self.depth >= max_depth {
            return Err(CodecError::Encode(format!(
                "nesting deeper than {max_depth} levels"
            )));
        }
        self.depth += 1;
        self.buf.push(number);
        body(self)?;
        self.buf.pop()?;
        self.depth -= 1;
        Ok(())
    }
}

/// Encodes `value` as a top-level message.
///
/// A class is written as its bare field list and an any-value as its bare
/// `{tag, payload}` pair. Anything else becomes field 1 of an implicit
/// message; an array thus becomes a repeated field 1. A null root of any
/// kind is written as no bytes at all.
pub(crate) fn encode_root(resolver: &CodecResolver, codec: &Codec, value: &Value) -> Result<Bytes> {
    let mut ctx = EncodeContext::new(resolver);
    match (codec, value) {
        (_, value) if value.is_null() => {}
        (Codec::Class(class), Value::Object(instance)) => {
            if class.references() {
                ctx.refs.assign(instance);
            }
            class.encode_body(&mut ctx, instance)?;
        }
        (Codec::Any(any), value) => any.encode_body(&mut ctx, value)?,
        (codec, value) => codec.encode_field(&mut ctx, WRAPPER_FIELD, value)?,
    }
    trace!(
        len = ctx.buf.len(),
        objects = ctx.refs.len(),
        chunks = ctx.buf.chunk_count(),
        "encoded message"
    );
    ctx.buf.finish()
}
