//! # protoframe
//!
//! A reflection-driven binary serializer for object graphs, writing a
//! Protocol-Buffers-compatible wire format.
//!
//! - Types are described at runtime in a [`TypeRegistry`]: classes with
//!   numbered fields, enums, interfaces (any-values), arrays and maps
//! - Codecs are derived from those descriptions on first use and cached
//! - Nested messages are length-prefixed; the encoder reserves one byte for
//!   each prefix and backpatches it once the nested content is written
//! - Classes can opt into reference tracking, which writes every repeated
//!   occurrence of an instance as an id and preserves shared and cyclic
//!   structure on decode
//! - Any-values carry their type tag; a tag the decoder does not know leaves
//!   a [`Deferred`] value that re-encodes byte for byte
//!
//! ## Field hints
//!
//! - `"protobuf:signed"` ([`Field::signed`]): zigzag-encode a signed
//!   integer field, so small negative numbers stay short.
//! - `"protobuf:fixed"` ([`Field::fixed`]): write an integer field as
//!   fixed32 or fixed64. Takes precedence over `"protobuf:signed"`.
//!
//! ## Example
//!
//! ```rust
//! use protoframe::{BinaryFormat, ClassType, Field, TypeRef, TypeRegistry, Value};
//!
//! let registry = TypeRegistry::new();
//! registry
//!     .register(
//!         ClassType::new("Person")
//!             .field(Field::new("name", 1, TypeRef::STRING))
//!             .field(Field::new("age", 2, TypeRef::INT).optional()),
//!     )
//!     .unwrap();
//!
//! let format = BinaryFormat::new(registry.clone());
//! let person = registry
//!     .instantiate("Person", [("name", Value::from("Ada")), ("age", Value::I32(36))])
//!     .unwrap();
//!
//! let ty = TypeRef::named("Person");
//! let bytes = format.encode(&Value::Object(person.clone()), &ty).unwrap();
//! assert_eq!(&bytes[..], b"\x0a\x03Ada\x10\x24");
//!
//! let decoded = format.decode(bytes, &ty).unwrap();
//! assert_eq!(decoded, Value::Object(person));
//! ```

pub mod any;
pub mod array;
pub mod buffer;
pub mod class;
pub mod codec;
pub mod config;
mod decoder;
mod encoder;
pub mod primitive;
pub mod reader;
pub mod reference;
pub mod registry;
pub mod types;
pub mod value;
pub mod varint;

use bytes::Bytes;

pub use any::Deferred;
pub use codec::{Codec, CodecResolver};
pub use config::Config;
pub use reader::WireType;
pub use registry::{ClassType, EnumType, Field, InterfaceType, MethodType, TypeRegistry};
pub use types::{
    Access, AccessRef, FieldDescriptor, Flavour, Hints, PrimitiveKind, TypeDesc, TypeKind,
    TypeRef,
};
pub use value::{Enumerator, Object, Value};

/// Errors that can occur during encoding or decoding operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The input is not a valid encoding.
    #[error(transparent)]
    Malformed(#[from] MalformedInput),
    /// No type is registered under this name or type tag.
    #[error("Unresolvable type: {0}")]
    UnresolvableType(String),
    /// A reference id points past the instances decoded so far.
    #[error("Unresolvable reference {id}: {known} instances decoded so far")]
    UnresolvableReference { id: u64, known: usize },
    #[error("Required field '{field}' not found for class {class}")]
    MissingRequiredField { field: String, class: String },
    /// No codec exists for this kind of type.
    #[error("Unsupported {flavour:?} type {type_name}")]
    UnsupportedFlavour { flavour: Flavour, type_name: String },
    /// The value could not be encoded (e.g., it does not match its declared type).
    #[error("Encode error: {0}")]
    Encode(String),
    /// A type description is inconsistent.
    #[error("Schema error: {0}")]
    Schema(String),
}

impl CodecError {
    /// Whether the error was caused by the input bytes.
    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::Malformed(_))
    }
}

/// Ways in which input bytes can be invalid.
#[derive(Debug, thiserror::Error)]
pub enum MalformedInput {
    #[error("Insufficient data in buffer")]
    Truncated,
    #[error("Varint longer than 64 bits")]
    VarintOverflow,
    #[error("Unknown wire type {0}")]
    UnknownWireType(u8),
    #[error("Invalid field number {0}")]
    InvalidFieldNumber(u64),
    #[error("Expected {expected} payload, got {actual}")]
    UnexpectedWireType { expected: WireType, actual: WireType },
    #[error("Value {value} out of range for {kind}")]
    OutOfRange { kind: PrimitiveKind, value: String },
    #[error("Unknown ordinal {ordinal} for enum {type_name}")]
    UnknownEnumerator { type_name: String, ordinal: u64 },
    #[error("Invalid {kind} payload: {reason}")]
    InvalidValue { kind: PrimitiveKind, reason: String },
    #[error("Any-value without a type tag")]
    MissingTypeTag,
    #[error("Nesting deeper than {0} levels")]
    TooDeep(usize),
    #[error("Length {found} exceeds limit {max}")]
    LengthExceeded { found: usize, max: usize },
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Encodes and decodes values against the types of a [`TypeRegistry`].
///
/// One `BinaryFormat` can be shared between threads; each call keeps its
/// own buffers and reference tables.
#[derive(Debug)]
pub struct BinaryFormat {
    resolver: CodecResolver,
}

impl BinaryFormat {
    pub fn new(registry: TypeRegistry) -> Self {
        Self::with_config(registry, Config::default())
    }

    pub fn with_config(registry: TypeRegistry, config: Config) -> Self {
        Self {
            resolver: CodecResolver::new(registry, config),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.resolver.registry()
    }

    pub fn resolver(&self) -> &CodecResolver {
        &self.resolver
    }

    /// Encodes `value` as a message of type `ty`.
    ///
    /// # Errors
    /// Returns `CodecError` if `ty` cannot be encoded or `value` does not
    /// match it.
    pub fn encode(&self, value: &Value, ty: &TypeRef) -> Result<Bytes> {
        let access = self.registry().resolve(ty)?;
        self.encode_with(value, &access)
    }

    /// Like [`BinaryFormat::encode`], for a caller-supplied access.
    pub fn encode_with(&self, value: &Value, access: &AccessRef) -> Result<Bytes> {
        let codec = self.resolver.resolve(access, &Hints::default())?;
        encoder::encode_root(&self.resolver, &codec, value)
    }

    /// Decodes a message of type `ty`.
    ///
    /// # Errors
    /// Returns `CodecError` on malformed input, on a missing required field,
    /// or on a reference id that points forward.
    pub fn decode(&self, bytes: Bytes, ty: &TypeRef) -> Result<Value> {
        let access = self.registry().resolve(ty)?;
        self.decode_with(bytes, &access)
    }

    /// Like [`BinaryFormat::decode`], for a caller-supplied access.
    pub fn decode_with(&self, bytes: Bytes, access: &AccessRef) -> Result<Value> {
        let codec = self.resolver.resolve(access, &Hints::default())?;
        decoder::decode_root(&self.resolver, &codec, bytes)
    }

    /// Decodes the payload of a deferred any-value as type `ty`.
    pub fn materialize(&self, deferred: &Deferred, ty: &TypeRef) -> Result<Value> {
        let codec = self.resolver.resolve_type(ty, &Hints::default())?;
        let mut refs = reference::DecodeRefs::default();
        decoder::decode_raw(&self.resolver, &mut refs, &codec, deferred.payload().clone(), 0)
    }

    /// Materializes a deferred value as the type its own tag names.
    pub fn materialize_tagged(&self, deferred: &Deferred) -> Result<Value> {
        let codec = self.resolver.resolve_tag(deferred.type_tag())?;
        let mut refs = reference::DecodeRefs::default();
        decoder::decode_raw(&self.resolver, &mut refs, &codec, deferred.payload().clone(), 0)
    }

    /// Unregisters type `name` and drops the codecs built for it.
    pub fn forget(&self, name: &str) -> Option<AccessRef> {
        let removed = self.registry().unregister(name);
        self.resolver.cache().evict_named(name);
        removed
    }

    /// Drops every cached codec.
    pub fn clear_cache(&self) {
        self.resolver.cache().clear();
    }
}
