//! Codec for arrays and maps.
//!
//! An array is written as a repeated field: one occurrence of the field
//! number per non-null element, in order. Because that encoding cannot nest,
//! an element that is itself an array is wrapped in a message holding it as
//! field [`WRAPPER_FIELD`]. A map is a repeated field of entry messages, the
//! key in [`ENTRY_KEY`] and the value in [`ENTRY_VALUE`].

use crate::codec::{Codec, CodecResolver, DeferredCodec};
use crate::encoder::EncodeContext;
use crate::types::{AccessRef, Hints, TypeKind};
use crate::value::Value;
use crate::{CodecError, Result};
use std::fmt;

/// Field number of the elements inside an array wrapper message.
pub const WRAPPER_FIELD: u32 = 1;
/// Field number of the key inside a map entry.
pub const ENTRY_KEY: u32 = 1;
/// Field number of the value inside a map entry.
pub const ENTRY_VALUE: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    List,
    Map,
}

pub struct ArrayCodec {
    access: AccessRef,
    shape: Shape,
    component: DeferredCodec,
    key: Option<DeferredCodec>,
}

impl fmt::Debug for ArrayCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayCodec")
            .field("name", &self.name())
            .field("shape", &self.shape)
            .finish()
    }
}

impl ArrayCodec {
    /// The hints apply to the components (and keys) of the array.
    pub fn new(access: AccessRef, hints: Hints) -> Result<Self> {
        let shape = match access.desc().kind() {
            TypeKind::Array { .. } => Shape::List,
            TypeKind::Map { .. } => Shape::Map,
            _ => return Err(access.desc().unsupported()),
        };
        let key = (shape == Shape::Map).then(|| DeferredCodec::new(hints.clone()));
        Ok(Self {
            access,
            shape,
            component: DeferredCodec::new(hints),
            key,
        })
    }

    pub fn name(&self) -> &str {
        self.access.desc().name()
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Codec of the elements (or of the map values).
    pub fn component(&self, resolver: &CodecResolver) -> Result<Codec> {
        self.component
            .ensure_resolved(resolver, || self.access.component_access())
    }

    /// Codec of the map keys.
    pub fn key(&self, resolver: &CodecResolver) -> Result<Codec> {
        match &self.key {
            Some(key) => key.ensure_resolved(resolver, || self.access.key_access()),
            None => Err(self.access.desc().unsupported()),
        }
    }

    pub(crate) fn unlink_where(&self, stale: &dyn Fn(&Codec) -> bool) {
        self.component.unlink_where(stale);
        if let Some(key) = &self.key {
            key.unlink_where(stale);
        }
    }

    /// Writes every element as an occurrence of field `number`.
    pub(crate) fn encode_field(
        &self,
        ctx: &mut EncodeContext<'_>,
        number: u32,
        value: &Value,
    ) -> Result<()> {
        let resolver = ctx.resolver;
        match (self.shape, value) {
            (Shape::List, Value::Array(items)) => {
                let component = self.component(resolver)?;
                for item in items.iter().filter(|item| !item.is_null()) {
                    encode_element(ctx, &component, number, item)?;
                }
                Ok(())
            }
            (Shape::Map, Value::Map(entries)) => {
                let key_codec = self.key(resolver)?;
                let value_codec = self.component(resolver)?;
                for (key, value) in entries {
                    ctx.framed(number, |ctx| {
                        if !key.is_null() {
                            encode_element(ctx, &key_codec, ENTRY_KEY, key)?;
                        }
                        if !value.is_null() {
                            encode_element(ctx, &value_codec, ENTRY_VALUE, value)?;
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            }
            (_, other) => Err(CodecError::Encode(format!(
                "expected a value of {}, got {other:?}",
                self.name()
            ))),
        }
    }
}

/// Writes one element as field `number`, wrapping nested arrays.
pub(crate) fn encode_element(
    ctx: &mut EncodeContext<'_>,
    codec: &Codec,
    number: u32,
    item: &Value,
) -> Result<()> {
    match codec {
        Codec::Array(inner) => {
            ctx.framed(number, |ctx| inner.encode_field(ctx, WRAPPER_FIELD, item))
        }
        other => other.encode_field(ctx, number, item),
    }
}
