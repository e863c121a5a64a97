//! Decoding.
//!
//! The input is fully buffered, so decoding is a loop over the events of a
//! [`WireReader`] with an explicit stack of open frames instead of recursion.
//! Each frame knows the offset at which it ends; when the reader reaches it,
//! the frame's value is built and handed to the frame below as a field value
//! or as one more element of a repeated field.

use crate::any::{Deferred, PAYLOAD_FIELD, TYPE_TAG_FIELD};
use crate::array::{ArrayCodec, Shape, ENTRY_KEY, ENTRY_VALUE, WRAPPER_FIELD};
use crate::class::ClassCodec;
use crate::codec::{Codec, CodecResolver};
use crate::primitive::PrimitiveCodec;
use crate::reader::{unexpected, Payload, RawPayload, WireReader, WireType};
use crate::reference::DecodeRefs;
use crate::types::PrimitiveKind;
use crate::value::{Object, Value};
use crate::{any, varint, CodecError, MalformedInput, Result};
use bit_set::BitSet;
use bytes::{Buf, Bytes};
use std::sync::Arc;
use tracing::trace;

/// Where a finished frame's value goes in the frame below it.
#[derive(Clone, Copy, Debug)]
enum Target {
    Root,
    Set(usize),
    Append(usize, Shape),
}

struct Frame {
    kind: FrameKind,
    end: usize,
    target: Target,
}

enum FrameKind {
    Class(ClassFrame),
    /// An array wrapper message, or the implicit root message of an array.
    Array {
        array: Arc<ArrayCodec>,
        items: Builder,
    },
    /// One map entry.
    Entry {
        array: Arc<ArrayCodec>,
        key: Value,
        value: Value,
    },
    Any(AnyFrame),
    /// The implicit root message of a primitive or enum value.
    Single {
        codec: Codec,
        value: Value,
    },
}

struct ClassFrame {
    codec: Arc<ClassCodec>,
    instance: Object,
    seen: BitSet,
    // Completion fields among `seen`.
    marked: usize,
    builders: Vec<(usize, Builder)>,
}

#[derive(Default)]
struct AnyFrame {
    tag: Option<String>,
    target: Option<Codec>,
    value: Option<Value>,
    // Payload read before its tag could be resolved.
    stash: Option<RawPayload>,
}

/// Accumulates the elements of a repeated field.
enum Builder {
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Builder {
    fn new(shape: Shape) -> Self {
        match shape {
            Shape::List => Builder::List(Vec::new()),
            Shape::Map => Builder::Map(Vec::new()),
        }
    }

    fn push(&mut self, value: Value) {
        match (self, value) {
            (Builder::List(items), value) => items.push(value),
            (Builder::Map(entries), Value::Map(more)) => entries.extend(more),
            (Builder::Map(entries), key) => entries.push((key, Value::Null)),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Builder::List(items) => Value::Array(items),
            Builder::Map(entries) => Value::Map(entries),
        }
    }
}

enum Route {
    Skip,
    Stash,
    Single { slot: usize, codec: Codec },
    Element { slot: usize, array: Arc<ArrayCodec> },
}

enum Step {
    Value(Value),
    Values(Vec<Value>),
    Descend(FrameKind, usize),
}

impl ClassFrame {
    fn set(&mut self, slot: usize, value: Value) -> Result<()> {
        self.codec.set(&self.instance, slot, value)?;
        if self.seen.insert(slot) && self.codec.in_completion(slot) {
            self.marked += 1;
        }
        Ok(())
    }

    fn append(&mut self, slot: usize, shape: Shape, value: Value) {
        match self.builders.iter_mut().find(|(s, _)| *s == slot) {
            Some((_, builder)) => builder.push(value),
            None => {
                let mut builder = Builder::new(shape);
                builder.push(value);
                self.builders.push((slot, builder));
            }
        }
    }

    fn finish(mut self) -> Result<Value> {
        for (slot, builder) in std::mem::take(&mut self.builders) {
            self.set(slot, builder.into_value())?;
        }
        self.codec
            .complete(&self.instance, &self.seen, self.marked)?;
        Ok(Value::Object(self.instance))
    }
}

impl AnyFrame {
    fn set_tag(&mut self, value: Value, resolver: &CodecResolver) -> Result<()> {
        let tag = match value {
            Value::TypeTag(tag) | Value::String(tag) => tag,
            other => {
                return Err(MalformedInput::InvalidValue {
                    kind: PrimitiveKind::TypeTag,
                    reason: format!("{other:?}"),
                }
                .into())
            }
        };
        match resolver.resolve_tag(&tag) {
            Ok(codec) => self.target = Some(codec),
            Err(CodecError::UnresolvableType(_)) => {
                trace!(tag = %tag, "unknown type tag, deferring payload");
            }
            Err(e) => return Err(e),
        }
        self.tag = Some(tag);
        Ok(())
    }

    fn finish(self, resolver: &CodecResolver, refs: &mut DecodeRefs, depth: usize) -> Result<Value> {
        if let Some(value) = self.value {
            return Ok(value);
        }
        let tag = self.tag.ok_or(MalformedInput::MissingTypeTag)?;
        match (self.stash, self.target) {
            // Payload arrived before the tag.
            (Some(raw), Some(codec)) => decode_raw(resolver, refs, &codec, raw, depth),
            (Some(raw), None) => Ok(Value::Deferred(Deferred::new(tag, raw))),
            (None, _) => Ok(Value::Null),
        }
    }
}

impl FrameKind {
    fn open(codec: &Codec, refs: &mut DecodeRefs) -> Result<Self> {
        Ok(match codec {
            Codec::Class(class) => {
                let instance = class.access().new_instance()?;
                if class.references() {
                    refs.register(Value::Object(instance.clone()));
                }
                FrameKind::Class(ClassFrame {
                    codec: class.clone(),
                    instance,
                    seen: BitSet::with_capacity(class.fields().len()),
                    marked: 0,
                    builders: Vec::new(),
                })
            }
            Codec::Array(array) => FrameKind::Array {
                array: array.clone(),
                items: Builder::new(array.shape()),
            },
            Codec::Any(_) => FrameKind::Any(AnyFrame::default()),
            Codec::Primitive(_) | Codec::Enum(_) => FrameKind::Single {
                codec: codec.clone(),
                value: Value::Null,
            },
        })
    }

    fn route(&self, number: u32, resolver: &CodecResolver) -> Result<Route> {
        Ok(match self {
            FrameKind::Class(frame) => match frame.codec.slot_of(number) {
                None => Route::Skip,
                Some(slot) => match frame.codec.field_codec(resolver, slot)? {
                    Codec::Array(array) => Route::Element { slot, array },
                    codec => Route::Single { slot, codec },
                },
            },
            FrameKind::Array { array, .. } if number == WRAPPER_FIELD => Route::Element {
                slot: 0,
                array: array.clone(),
            },
            FrameKind::Entry { array, .. } if number == ENTRY_KEY => Route::Single {
                slot: 0,
                codec: array.key(resolver)?,
            },
            FrameKind::Entry { array, .. } if number == ENTRY_VALUE => Route::Single {
                slot: 1,
                codec: array.component(resolver)?,
            },
            FrameKind::Any(_) if number == TYPE_TAG_FIELD => Route::Single {
                slot: 0,
                codec: Codec::Primitive(any::type_tag_codec()),
            },
            FrameKind::Any(frame) if number == PAYLOAD_FIELD => match &frame.target {
                Some(codec) => Route::Single {
                    slot: 1,
                    codec: codec.clone(),
                },
                None => Route::Stash,
            },
            FrameKind::Single { codec, .. } if number == WRAPPER_FIELD => Route::Single {
                slot: 0,
                codec: codec.clone(),
            },
            _ => Route::Skip,
        })
    }

    fn deliver(&mut self, target: Target, value: Value, resolver: &CodecResolver) -> Result<()> {
        match (self, target) {
            (_, Target::Root) => {}
            (FrameKind::Class(frame), Target::Set(slot)) => frame.set(slot, value)?,
            (FrameKind::Class(frame), Target::Append(slot, shape)) => {
                frame.append(slot, shape, value)
            }
            (FrameKind::Array { items, .. }, _) => items.push(value),
            (FrameKind::Entry { key, .. }, Target::Set(0)) => *key = value,
            (FrameKind::Entry { value: slot, .. }, _) => *slot = value,
            (FrameKind::Any(frame), Target::Set(0)) => frame.set_tag(value, resolver)?,
            (FrameKind::Any(frame), _) => frame.value = Some(value),
            (FrameKind::Single { value: slot, .. }, _) => *slot = value,
        }
        Ok(())
    }

    fn stash(&mut self, raw: RawPayload) {
        if let FrameKind::Any(frame) = self {
            frame.stash = Some(raw);
        }
    }

    fn finish(self, resolver: &CodecResolver, refs: &mut DecodeRefs, depth: usize) -> Result<Value> {
        match self {
            FrameKind::Class(frame) => frame.finish(),
            FrameKind::Array { items, .. } => Ok(items.into_value()),
            FrameKind::Entry { key, value, .. } => Ok(Value::Map(vec![(key, value)])),
            FrameKind::Any(frame) => frame.finish(resolver, refs, depth),
            FrameKind::Single { value, .. } => Ok(value),
        }
    }
}

/// Turns one field payload into a value, or into a frame to descend into.
fn accept(
    codec: &Codec,
    payload: Payload,
    reader: &mut WireReader,
    refs: &mut DecodeRefs,
) -> Result<Step> {
    Ok(match (codec, payload) {
        (Codec::Primitive(p), payload) => Step::Value(p.decode(&reader.read_raw(payload))?),
        (Codec::Enum(e), payload) => Step::Value(e.decode(&reader.read_raw(payload))?),
        (Codec::Class(_) | Codec::Any(_), Payload::Varint(id)) => Step::Value(refs.resolve(id)?),
        (codec, Payload::Delimited { start, len }) => {
            Step::Descend(FrameKind::open(codec, refs)?, start + len)
        }
        (_, payload) => return Err(unexpected(WireType::Delimited, payload.wire_type())),
    })
}

/// One occurrence of a repeated field.
fn accept_element(
    array: &Arc<ArrayCodec>,
    payload: Payload,
    reader: &mut WireReader,
    refs: &mut DecodeRefs,
    resolver: &CodecResolver,
) -> Result<Step> {
    match (array.shape(), payload) {
        (Shape::List, payload) => match array.component(resolver)? {
            // Packed scalars, as written by other protobuf encoders.
            Codec::Primitive(p)
                if p.wire_type() != WireType::Delimited
                    && matches!(payload, Payload::Delimited { .. }) =>
            {
                let raw = reader.read_raw(payload);
                Ok(Step::Values(unpack(&p, raw.as_bytes()?.clone())?))
            }
            component => accept(&component, payload, reader, refs),
        },
        (Shape::Map, Payload::Delimited { start, len }) => Ok(Step::Descend(
            FrameKind::Entry {
                array: array.clone(),
                key: Value::Null,
                value: Value::Null,
            },
            start + len,
        )),
        (Shape::Map, payload) => Err(unexpected(WireType::Delimited, payload.wire_type())),
    }
}

fn unpack(codec: &PrimitiveCodec, mut bytes: Bytes) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    while bytes.has_remaining() {
        let raw = match codec.wire_type() {
            WireType::Varint => RawPayload::Varint(varint::read(&mut bytes)?),
            WireType::Fixed32 => {
                if bytes.remaining() < 4 {
                    return Err(MalformedInput::Truncated.into());
                }
                RawPayload::Fixed32(bytes.get_u32_le())
            }
            WireType::Fixed64 => {
                if bytes.remaining() < 8 {
                    return Err(MalformedInput::Truncated.into());
                }
                RawPayload::Fixed64(bytes.get_u64_le())
            }
            WireType::Delimited => return Err(unexpected(WireType::Varint, WireType::Delimited)),
        };
        values.push(codec.decode(&raw)?);
    }
    Ok(values)
}

fn run(
    resolver: &CodecResolver,
    reader: &mut WireReader,
    refs: &mut DecodeRefs,
    root: FrameKind,
    base_depth: usize,
) -> Result<Value> {
    let max_depth = resolver.config().max_depth;
    let mut stack = vec![Frame {
        kind: root,
        end: reader.len(),
        target: Target::Root,
    }];

    while let Some(top) = stack.last_mut() {
        if reader.position() < top.end {
            let event = reader.next_event(top.end)?;
            let (target, step) = match top.kind.route(event.number, resolver)? {
                Route::Skip => {
                    trace!(field = event.number, "skipping unknown field");
                    reader.skip(event.payload);
                    continue;
                }
                Route::Stash => {
                    let raw = reader.read_raw(event.payload);
                    top.kind.stash(raw);
                    continue;
                }
                Route::Single { slot, codec } => (
                    Target::Set(slot),
                    accept(&codec, event.payload, reader, refs)?,
                ),
                Route::Element { slot, array } => (
                    Target::Append(slot, array.shape()),
                    accept_element(&array, event.payload, reader, refs, resolver)?,
                ),
            };
            match step {
                Step::Value(value) => top.kind.deliver(target, value, resolver)?,
                Step::Values(values) => {
                    for value in values {
                        top.kind.deliver(target, value, resolver)?;
                    }
                }
                Step::Descend(kind, end) => {
                    if base_depth + stack.len() > max_depth {
                        return Err(MalformedInput::TooDeep(max_depth).into());
                    }
                    stack.push(Frame { kind, end, target });
                }
            }
            continue;
        }

        let Some(frame) = stack.pop() else { break };
        let value = frame
            .kind
            .finish(resolver, refs, base_depth + stack.len())?;
        match stack.last_mut() {
            Some(parent) => parent.kind.deliver(frame.target, value, resolver)?,
            None => return Ok(value),
        }
    }
    Ok(Value::Null)
}

/// Decodes a complete message written by [`crate::encoder::encode_root`].
///
/// Empty input is a null any-value. Class and array roots have no null
/// form on the wire: they decode to an empty instance or array.
pub(crate) fn decode_root(resolver: &CodecResolver, codec: &Codec, bytes: Bytes) -> Result<Value> {
    let len = bytes.len();
    if len == 0 && matches!(codec, Codec::Any(_)) {
        return Ok(Value::Null);
    }
    let mut reader = WireReader::new(bytes).with_max_length(resolver.config().max_length);
    let mut refs = DecodeRefs::default();
    let root = FrameKind::open(codec, &mut refs)?;
    let value = run(resolver, &mut reader, &mut refs, root, 0)?;
    trace!(len, objects = refs.len(), "decoded message");
    Ok(value)
}

/// Decodes a detached payload with `codec`, sharing `refs` with the caller.
pub(crate) fn decode_raw(
    resolver: &CodecResolver,
    refs: &mut DecodeRefs,
    codec: &Codec,
    raw: RawPayload,
    base_depth: usize,
) -> Result<Value> {
    match (codec, raw) {
        (Codec::Primitive(p), raw) => p.decode(&raw),
        (Codec::Enum(e), raw) => e.decode(&raw),
        (Codec::Class(_) | Codec::Any(_), RawPayload::Varint(id)) => refs.resolve(id),
        (codec, RawPayload::Delimited(bytes)) => {
            let mut reader = WireReader::new(bytes).with_max_length(resolver.config().max_length);
            let root = FrameKind::open(codec, refs)?;
            run(resolver, &mut reader, refs, root, base_depth)
        }
        (_, raw) => Err(unexpected(WireType::Delimited, raw.wire_type())),
    }
}
