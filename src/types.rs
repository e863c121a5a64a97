//! Language-neutral type descriptions and the field-access capability.
//!
//! Codecs never look at concrete Rust types. They are driven entirely by a
//! [`TypeDesc`] (what a type looks like) and an [`Access`] (how to build an
//! instance of it and read or write its fields).

use crate::value::{Object, Value};
use crate::{CodecError, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Hint selecting zigzag encoding for signed integer fields.
pub const HINT_SIGNED: &str = "protobuf:signed";
/// Hint selecting fixed32/fixed64 encoding for integer fields.
pub const HINT_FIXED: &str = "protobuf:fixed";

/// Coarse category of a type; drives codec selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flavour {
    Primitive,
    Enum,
    Class,
    Array,
    Interface,
    Method,
    Unknown,
}

/// Semantic kinds with a built-in codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    String,
    Bytes,
    Date,
    Uuid,
    BigInt,
    Decimal,
    TypeTag,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 19] = [
        PrimitiveKind::Bool,
        PrimitiveKind::I8,
        PrimitiveKind::I16,
        PrimitiveKind::I32,
        PrimitiveKind::I64,
        PrimitiveKind::U8,
        PrimitiveKind::U16,
        PrimitiveKind::U32,
        PrimitiveKind::U64,
        PrimitiveKind::F32,
        PrimitiveKind::F64,
        PrimitiveKind::Char,
        PrimitiveKind::String,
        PrimitiveKind::Bytes,
        PrimitiveKind::Date,
        PrimitiveKind::Uuid,
        PrimitiveKind::BigInt,
        PrimitiveKind::Decimal,
        PrimitiveKind::TypeTag,
    ];

    /// Name written as the type tag of an any-value holding this kind.
    pub fn type_tag(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "boolean",
            PrimitiveKind::I8 => "byte",
            PrimitiveKind::I16 => "short",
            PrimitiveKind::I32 => "int",
            PrimitiveKind::I64 => "long",
            PrimitiveKind::U8 => "ubyte",
            PrimitiveKind::U16 => "ushort",
            PrimitiveKind::U32 => "uint",
            PrimitiveKind::U64 => "ulong",
            PrimitiveKind::F32 => "float",
            PrimitiveKind::F64 => "double",
            PrimitiveKind::Char => "char",
            PrimitiveKind::String => "string",
            PrimitiveKind::Bytes => "bytes",
            PrimitiveKind::Date => "date",
            PrimitiveKind::Uuid => "uuid",
            PrimitiveKind::BigInt => "bigint",
            PrimitiveKind::Decimal => "decimal",
            PrimitiveKind::TypeTag => "type",
        }
    }

    pub fn from_type_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_tag() == tag)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

/// Free-form per-field hints such as [`HINT_SIGNED`] and [`HINT_FIXED`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Hints(BTreeSet<String>);

impl Hints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hint: impl Into<String>) -> Self {
        self.insert(hint);
        self
    }

    pub fn insert(&mut self, hint: impl Into<String>) {
        self.0.insert(hint.into());
    }

    pub fn contains(&self, hint: &str) -> bool {
        self.0.contains(hint)
    }

    pub fn is_signed(&self) -> bool {
        self.contains(HINT_SIGNED)
    }

    pub fn is_fixed(&self) -> bool {
        self.contains(HINT_FIXED)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Hints {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Reference from a field (or array component) to its type.
///
/// `Named` references are resolved lazily through the registry, so a class
/// may refer to itself or to a type registered later.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Primitive(PrimitiveKind),
    Named(Arc<str>),
    Array(Box<TypeRef>),
    Map(Box<TypeRef>, Box<TypeRef>),
    /// Any registered type; values carry their own type tag.
    Any,
}

impl TypeRef {
    pub const BOOL: TypeRef = TypeRef::Primitive(PrimitiveKind::Bool);
    pub const INT: TypeRef = TypeRef::Primitive(PrimitiveKind::I32);
    pub const LONG: TypeRef = TypeRef::Primitive(PrimitiveKind::I64);
    pub const DOUBLE: TypeRef = TypeRef::Primitive(PrimitiveKind::F64);
    pub const STRING: TypeRef = TypeRef::Primitive(PrimitiveKind::String);
    pub const BYTES: TypeRef = TypeRef::Primitive(PrimitiveKind::Bytes);

    pub fn named(name: impl Into<Arc<str>>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn array_of(component: TypeRef) -> Self {
        TypeRef::Array(Box::new(component))
    }

    pub fn map_of(key: TypeRef, value: TypeRef) -> Self {
        TypeRef::Map(Box::new(key), Box::new(value))
    }
}

impl From<PrimitiveKind> for TypeRef {
    fn from(kind: PrimitiveKind) -> Self {
        TypeRef::Primitive(kind)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Primitive(kind) => write!(f, "{kind}"),
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::Array(component) => write!(f, "[{component}]"),
            TypeRef::Map(key, value) => write!(f, "{{{key}: {value}}}"),
            TypeRef::Any => f.write_str("any"),
        }
    }
}

/// One field of a class.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    name: Arc<str>,
    number: u32,
    index: usize,
    optional: bool,
    default: Option<Value>,
    hints: Hints,
    ty: TypeRef,
}

impl FieldDescriptor {
    pub fn new(
        name: impl Into<Arc<str>>,
        number: u32,
        index: usize,
        ty: TypeRef,
    ) -> Self {
        Self {
            name: name.into(),
            number,
            index,
            optional: false,
            default: None,
            hints: Hints::default(),
            ty,
        }
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_default(mut self, default: Option<Value>) -> Self {
        self.default = default;
        self
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable identity of the field on the wire (never zero).
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Position of the field's slot in an instance.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }
}

/// Shape of a described type.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Enum {
        variants: Vec<Arc<str>>,
    },
    Class {
        fields: Vec<FieldDescriptor>,
        /// Repeated occurrences of one instance are written as reference ids.
        references: bool,
    },
    Array {
        component: TypeRef,
    },
    /// An array of key/value entries.
    Map {
        key: TypeRef,
        value: TypeRef,
    },
    Interface,
    Method,
    Unknown,
}

/// A named type description.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDesc {
    name: Arc<str>,
    kind: TypeKind,
}

impl TypeDesc {
    pub fn new(name: impl Into<Arc<str>>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn flavour(&self) -> Flavour {
        match self.kind {
            TypeKind::Primitive(_) => Flavour::Primitive,
            TypeKind::Enum { .. } => Flavour::Enum,
            TypeKind::Class { .. } => Flavour::Class,
            TypeKind::Array { .. } | TypeKind::Map { .. } => Flavour::Array,
            TypeKind::Interface => Flavour::Interface,
            TypeKind::Method => Flavour::Method,
            TypeKind::Unknown => Flavour::Unknown,
        }
    }

    /// Fields of a class; empty for every other kind.
    pub fn fields(&self) -> &[FieldDescriptor] {
        match &self.kind {
            TypeKind::Class { fields, .. } => fields,
            _ => &[],
        }
    }

    pub fn references(&self) -> bool {
        matches!(self.kind, TypeKind::Class { references: true, .. })
    }

    pub fn variants(&self) -> &[Arc<str>] {
        match &self.kind {
            TypeKind::Enum { variants } => variants,
            _ => &[],
        }
    }

    pub(crate) fn unsupported(&self) -> CodecError {
        CodecError::UnsupportedFlavour {
            flavour: self.flavour(),
            type_name: self.name.to_string(),
        }
    }
}

/// Reflective access to one type.
///
/// Implementations must hand out the *same* `Arc` for the same type on every
/// call: codecs are cached by the identity of the access.
pub trait Access: Send + Sync + fmt::Debug {
    /// Description of the type this access serves.
    fn desc(&self) -> &TypeDesc;

    /// Access for the declared type of `field`.
    fn field_access(&self, field: &FieldDescriptor) -> Result<AccessRef>;

    /// Access for the elements of an array, or the values of a map.
    fn component_access(&self) -> Result<AccessRef> {
        Err(self.desc().unsupported())
    }

    /// Access for the keys of a map.
    fn key_access(&self) -> Result<AccessRef> {
        Err(self.desc().unsupported())
    }

    /// Constructs a new, empty instance of a class.
    fn new_instance(&self) -> Result<Object> {
        Err(self.desc().unsupported())
    }

    fn get(&self, instance: &Object, field: &FieldDescriptor) -> Result<Value>;

    fn set(&self, instance: &Object, field: &FieldDescriptor, value: Value) -> Result<()>;

    fn flavour(&self) -> Flavour {
        self.desc().flavour()
    }
}

/// Shared handle to an [`Access`].
pub type AccessRef = Arc<dyn Access>;
