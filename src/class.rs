//! Codec for classes: an embedded message with one field per declared field.

use crate::codec::{Codec, CodecResolver, DeferredCodec};
use crate::encoder::EncodeContext;
use crate::reader::{WireType, MAX_FIELD_NUMBER};
use crate::reference::Seen;
use crate::types::{AccessRef, FieldDescriptor, TypeKind, TypeRef};
use crate::value::{Object, Value};
use crate::{CodecError, Result};
use bit_set::BitSet;
use std::fmt;

/// Open-hashed index from field number to slot, threaded in ascending
/// field-number order.
#[derive(Debug)]
struct FieldIndex {
    buckets: Vec<Option<usize>>,
    entries: Vec<IndexEntry>,
    first: Option<usize>,
}

#[derive(Debug)]
struct IndexEntry {
    number: u32,
    slot: usize,
    // Next entry in the same bucket.
    chain: Option<usize>,
    // Next entry in field-number order.
    next: Option<usize>,
}

impl FieldIndex {
    fn build(class: &str, fields: &[FieldDescriptor]) -> Result<Self> {
        let capacity = fields.len().max(1);
        let mut buckets = vec![None; capacity];
        let mut entries: Vec<IndexEntry> = Vec::with_capacity(fields.len());
        for (slot, field) in fields.iter().enumerate() {
            let number = field.number();
            if number == 0 || number > MAX_FIELD_NUMBER {
                return Err(CodecError::Schema(format!(
                    "{class}.{}: invalid field number {number}",
                    field.name()
                )));
            }
            let bucket = (number as usize - 1) % capacity;
            let mut cursor = buckets[bucket];
            while let Some(i) = cursor {
                let other: &IndexEntry = &entries[i];
                if other.number == number {
                    return Err(CodecError::Schema(format!(
                        "{class}: fields '{}' and '{}' share number {number}",
                        fields[other.slot].name(),
                        field.name()
                    )));
                }
                cursor = other.chain;
            }
            entries.push(IndexEntry {
                number,
                slot,
                chain: buckets[bucket],
                next: None,
            });
            buckets[bucket] = Some(entries.len() - 1);
        }

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| entries[i].number);
        for pair in order.windows(2) {
            entries[pair[0]].next = Some(pair[1]);
        }
        Ok(Self {
            buckets,
            entries,
            first: order.first().copied(),
        })
    }

    fn lookup(&self, number: u32) -> Option<usize> {
        if number == 0 {
            return None;
        }
        let bucket = (number as usize - 1) % self.buckets.len();
        let mut cursor = self.buckets[bucket];
        while let Some(i) = cursor {
            let entry = &self.entries[i];
            if entry.number == number {
                return Some(entry.slot);
            }
            cursor = entry.chain;
        }
        None
    }

    fn ordered(&self) -> Ordered<'_> {
        Ordered {
            index: self,
            cursor: self.first,
        }
    }
}

/// Slots in ascending field-number order.
pub struct Ordered<'a> {
    index: &'a FieldIndex,
    cursor: Option<usize>,
}

impl Iterator for Ordered<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let entry = &self.index.entries[self.cursor?];
        self.cursor = entry.next;
        Some(entry.slot)
    }
}

/// A field that must end up with a value after decoding: either a required
/// field or one with a default to backfill.
#[derive(Debug)]
struct Completion {
    slot: usize,
    default: Option<Value>,
}

/// Codec for one class.
///
/// Fields are written in ascending field-number order regardless of
/// declaration order. Null fields and fields equal to their declared default
/// are not written.
pub struct ClassCodec {
    access: AccessRef,
    fields: Vec<FieldDescriptor>,
    slots: Vec<DeferredCodec>,
    index: FieldIndex,
    completion: Vec<Completion>,
    in_completion: BitSet,
    references: bool,
}

impl fmt::Debug for ClassCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassCodec")
            .field("name", &self.name())
            .field("fields", &self.fields.len())
            .field("references", &self.references)
            .finish()
    }
}

impl ClassCodec {
    /// # Errors
    /// [`CodecError::Schema`] for a zero, oversized or duplicate field number.
    pub fn new(access: AccessRef) -> Result<Self> {
        let desc = access.desc();
        let (fields, references) = match desc.kind() {
            TypeKind::Class { fields, references } => (fields.clone(), *references),
            _ => return Err(desc.unsupported()),
        };
        let index = FieldIndex::build(desc.name(), &fields)?;

        let mut completion = Vec::new();
        let mut in_completion = BitSet::with_capacity(fields.len());
        for (slot, field) in fields.iter().enumerate() {
            if field.is_optional() && field.default_value().is_none() {
                continue;
            }
            // An empty repeated field leaves nothing on the wire.
            let default = match (field.default_value(), field.ty()) {
                (Some(default), _) => Some(default.clone()),
                (None, TypeRef::Array(_)) => Some(Value::Array(Vec::new())),
                (None, TypeRef::Map(..)) => Some(Value::Map(Vec::new())),
                (None, _) => None,
            };
            completion.push(Completion { slot, default });
            in_completion.insert(slot);
        }
        let slots = fields
            .iter()
            .map(|field| DeferredCodec::new(field.hints().clone()))
            .collect();

        Ok(Self {
            access,
            fields,
            slots,
            index,
            completion,
            in_completion,
            references,
        })
    }

    pub fn name(&self) -> &str {
        self.access.desc().name()
    }

    pub fn access(&self) -> &AccessRef {
        &self.access
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Whether repeated instances are written as reference ids.
    pub fn references(&self) -> bool {
        self.references
    }

    /// Slot of the field with wire number `number`.
    pub fn slot_of(&self, number: u32) -> Option<usize> {
        self.index.lookup(number)
    }

    /// Slots in the order their fields are written.
    pub fn ordered_slots(&self) -> Ordered<'_> {
        self.index.ordered()
    }

    /// Number of fields that are required or carry a default.
    pub fn completion_len(&self) -> usize {
        self.completion.len()
    }

    pub(crate) fn in_completion(&self, slot: usize) -> bool {
        self.in_completion.contains(slot)
    }

    /// Codec of the field in `slot`.
    pub fn field_codec(&self, resolver: &CodecResolver, slot: usize) -> Result<Codec> {
        let field = &self.fields[slot];
        self.slots[slot].ensure_resolved(resolver, || self.access.field_access(field))
    }

    pub(crate) fn unlink_where(&self, stale: &dyn Fn(&Codec) -> bool) {
        for slot in &self.slots {
            slot.unlink_where(stale);
        }
    }

    pub(crate) fn encode_field(
        &self,
        ctx: &mut EncodeContext<'_>,
        number: u32,
        value: &Value,
    ) -> Result<()> {
        let instance = value.as_object().ok_or_else(|| {
            CodecError::Encode(format!(
                "expected an instance of {}, got {value:?}",
                self.name()
            ))
        })?;
        if self.references {
            if let Seen::Existing(id) = ctx.refs.assign(instance) {
                ctx.buf.put_tag(number, WireType::Varint);
                ctx.buf.put_varint(id);
                return Ok(());
            }
        }
        ctx.framed(number, |ctx| self.encode_body(ctx, instance))
    }

    /// Writes the fields of `instance` without an enclosing tag.
    pub(crate) fn encode_body(&self, ctx: &mut EncodeContext<'_>, instance: &Object) -> Result<()> {
        let resolver = ctx.resolver;
        for slot in self.ordered_slots() {
            let field = &self.fields[slot];
            let value = self.access.get(instance, field)?;
            if value.is_null() || field.default_value() == Some(&value) {
                continue;
            }
            self.field_codec(resolver, slot)?
                .encode_field(ctx, field.number(), &value)?;
        }
        Ok(())
    }

    /// Stores a decoded field value.
    pub(crate) fn set(&self, instance: &Object, slot: usize, value: Value) -> Result<()> {
        self.access.set(instance, &self.fields[slot], value)
    }

    /// Backfills defaults and checks required fields once an instance is
    /// fully read. `marked` counts the completion fields seen on the wire.
    pub(crate) fn complete(&self, instance: &Object, seen: &BitSet, marked: usize) -> Result<()> {
        if marked >= self.completion.len() {
            return Ok(());
        }
        for entry in &self.completion {
            if seen.contains(entry.slot) {
                continue;
            }
            let field = &self.fields[entry.slot];
            match &entry.default {
                Some(default) => self.access.set(instance, field, default.clone())?,
                None => {
                    return Err(CodecError::MissingRequiredField {
                        field: field.name().to_string(),
                        class: self.name().to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}
