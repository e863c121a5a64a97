//! Dynamic values and shared object handles.

use crate::any::Deferred;
use crate::types::PrimitiveKind;
use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A value of any described type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Bytes(Bytes),
    Date(DateTime<Utc>),
    Uuid(Uuid),
    BigInt(BigInt),
    Decimal(BigDecimal),
    /// Opaque type identifier.
    TypeTag(String),
    Enum(Enumerator),
    Object(Object),
    Array(Vec<Value>),
    /// Ordered key/value entries.
    Map(Vec<(Value, Value)>),
    /// An any-value whose type was not registered when it was decoded.
    Deferred(Deferred),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Primitive kind of a scalar value.
    pub fn kind(&self) -> Option<PrimitiveKind> {
        let kind = match self {
            Value::Bool(_) => PrimitiveKind::Bool,
            Value::I8(_) => PrimitiveKind::I8,
            Value::I16(_) => PrimitiveKind::I16,
            Value::I32(_) => PrimitiveKind::I32,
            Value::I64(_) => PrimitiveKind::I64,
            Value::U8(_) => PrimitiveKind::U8,
            Value::U16(_) => PrimitiveKind::U16,
            Value::U32(_) => PrimitiveKind::U32,
            Value::U64(_) => PrimitiveKind::U64,
            Value::F32(_) => PrimitiveKind::F32,
            Value::F64(_) => PrimitiveKind::F64,
            Value::Char(_) => PrimitiveKind::Char,
            Value::String(_) => PrimitiveKind::String,
            Value::Bytes(_) => PrimitiveKind::Bytes,
            Value::Date(_) => PrimitiveKind::Date,
            Value::Uuid(_) => PrimitiveKind::Uuid,
            Value::BigInt(_) => PrimitiveKind::BigInt,
            Value::Decimal(_) => PrimitiveKind::Decimal,
            Value::TypeTag(_) => PrimitiveKind::TypeTag,
            _ => return None,
        };
        Some(kind)
    }

    /// Type tag identifying the concrete type of this value inside an any-value.
    pub fn type_tag(&self) -> Option<&str> {
        match self {
            Value::Null => None,
            Value::Enum(e) => Some(e.type_name()),
            Value::Object(o) => Some(o.type_name()),
            Value::Array(_) => Some(crate::any::ARRAY_TAG),
            Value::Map(_) => Some(crate::any::MAP_TAG),
            Value::Deferred(d) => Some(d.type_tag()),
            scalar => scalar.kind().map(PrimitiveKind::type_tag),
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::TypeTag(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(d) => Some(d),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => String,
    Bytes => Bytes,
    DateTime<Utc> => Date,
    Uuid => Uuid,
    BigInt => BigInt,
    BigDecimal => Decimal,
    Enumerator => Enum,
    Object => Object,
    Vec<Value> => Array,
    Deferred => Deferred,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One constant of an enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Enumerator {
    type_name: Arc<str>,
    ordinal: u32,
    name: Arc<str>,
}

impl Enumerator {
    pub fn new(type_name: impl Into<Arc<str>>, ordinal: u32, name: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            ordinal,
            name: name.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

struct ObjectInner {
    type_name: Arc<str>,
    slots: RwLock<Vec<Value>>,
}

/// Shared, mutable instance of a class.
///
/// Cloning an `Object` clones the handle, not the instance: both handles see
/// the same slots, and [`Object::ptr_eq`] reports them identical. Equality
/// (`==`) holds for identical handles and, failing that, for instances of the
/// same type with equal slots. Comparing two distinct cyclic graphs does not
/// terminate.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    /// Creates an instance with `slots` null fields.
    pub fn new(type_name: impl Into<Arc<str>>, slots: usize) -> Self {
        Self(Arc::new(ObjectInner {
            type_name: type_name.into(),
            slots: RwLock::new(vec![Value::Null; slots]),
        }))
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    pub fn slot_count(&self) -> usize {
        self.0.slots.read().len()
    }

    /// Value of slot `index`, or null when out of range.
    pub fn get(&self, index: usize) -> Value {
        self.0
            .slots
            .read()
            .get(index)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Stores `value` in slot `index`, growing the instance if needed.
    pub fn set(&self, index: usize, value: Value) {
        let mut slots = self.0.slots.write();
        if index >= slots.len() {
            slots.resize(index + 1, Value::Null);
        }
        slots[index] = value;
    }

    /// Whether both handles refer to the same instance.
    pub fn ptr_eq(a: &Object, b: &Object) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Identity of the instance, stable while any handle to it is alive.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        if Object::ptr_eq(self, other) {
            return true;
        }
        self.type_name() == other.type_name() && *self.0.slots.read() == *other.0.slots.read()
    }
}

impl fmt::Debug for Object {
    // Type and address only; graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.type_name(), self.addr())
    }
}
