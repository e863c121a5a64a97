//! Runtime type registry.
//!
//! Types are described with the builders in this module ([`ClassType`],
//! [`EnumType`], [`InterfaceType`], [`MethodType`]) and registered by name.
//! The registry hands out one [`AccessRef`] per type, backed by [`Object`]
//! slot storage: field `i` of a class lives in slot `i`.

use crate::any::{ARRAY_TAG, MAP_TAG};
use crate::types::{
    Access, AccessRef, FieldDescriptor, Hints, PrimitiveKind, TypeDesc, TypeKind, TypeRef,
    HINT_FIXED, HINT_SIGNED,
};
use crate::value::{Enumerator, Object, Value};
use crate::{CodecError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Default)]
struct RegistryInner {
    named: RwLock<HashMap<Arc<str>, AccessRef>>,
    // Primitive, array, map and any accesses, created on first use.
    structural: RwLock<HashMap<TypeRef, AccessRef>>,
    // Bumped whenever a registered name is replaced or removed.
    generation: AtomicU64,
}

/// Registry of type descriptions, cheap to clone.
///
/// # Examples
///
/// ```
/// use protoframe::registry::{ClassType, Field, TypeRegistry};
/// use protoframe::types::{Flavour, TypeRef};
///
/// let registry = TypeRegistry::new();
/// registry
///     .register(
///         ClassType::new("Point")
///             .field(Field::new("x", 1, TypeRef::INT))
///             .field(Field::new("y", 2, TypeRef::INT)),
///     )
///     .unwrap();
/// let access = registry.resolve(&TypeRef::named("Point")).unwrap();
/// assert_eq!(access.flavour(), Flavour::Class);
/// ```
#[derive(Clone, Default)]
pub struct TypeRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.inner.named.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a named type.
    ///
    /// # Errors
    /// [`CodecError::Schema`] for an empty name.
    pub fn register(&self, ty: impl Into<TypeDesc>) -> Result<AccessRef> {
        let desc = ty.into();
        if desc.name().is_empty() {
            return Err(CodecError::Schema("type name must not be empty".to_string()));
        }
        let name = desc.shared_name().clone();
        let access: AccessRef = Arc::new(RegisteredAccess {
            registry: Arc::downgrade(&self.inner),
            desc,
        });
        let replaced = self
            .inner
            .named
            .write()
            .insert(name.clone(), access.clone())
            .is_some();
        if replaced {
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
        }
        debug!(type_name = %name, replaced, "registered type");
        Ok(access)
    }

    /// Removes a named type, returning its access.
    pub fn unregister(&self, name: &str) -> Option<AccessRef> {
        let removed = self.inner.named.write().remove(name);
        if removed.is_some() {
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            debug!(type_name = name, "unregistered type");
        }
        removed
    }

    /// Counts the replacements and removals of named types so far.
    ///
    /// Codecs built before the count last changed may describe a schema that
    /// is no longer registered.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Looks up a type by the tag an any-value carries: registered names
    /// first, then primitive tags, `"array"` and `"map"`.
    pub fn lookup(&self, tag: &str) -> Option<AccessRef> {
        if let Some(access) = self.inner.named.read().get(tag) {
            return Some(access.clone());
        }
        let structural = if let Some(kind) = PrimitiveKind::from_type_tag(tag) {
            TypeRef::Primitive(kind)
        } else if tag == ARRAY_TAG {
            TypeRef::array_of(TypeRef::Any)
        } else if tag == MAP_TAG {
            TypeRef::map_of(TypeRef::Any, TypeRef::Any)
        } else {
            return None;
        };
        Some(self.structural(&structural))
    }

    /// Resolves a type reference to its access.
    ///
    /// A name that is not (yet) registered resolves to a fresh access of
    /// [`Flavour::Unknown`](crate::types::Flavour::Unknown), which no codec
    /// accepts; resolving again after registration yields the real type.
    pub fn resolve(&self, ty: &TypeRef) -> Result<AccessRef> {
        match ty {
            TypeRef::Named(name) => Ok(self
                .inner
                .named
                .read()
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.unknown(name.clone()))),
            structural => Ok(self.structural(structural)),
        }
    }

    /// Creates an instance of class `name` with the given field values.
    ///
    /// # Errors
    /// [`CodecError::UnresolvableType`] if `name` is not registered,
    /// [`CodecError::Schema`] for a field the class does not declare.
    pub fn instantiate<'a>(
        &self,
        name: &str,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Object> {
        let access = self
            .inner
            .named
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::UnresolvableType(name.to_string()))?;
        let instance = access.new_instance()?;
        for (field_name, value) in values {
            let field = access
                .desc()
                .fields()
                .iter()
                .find(|f| f.name() == field_name)
                .ok_or_else(|| {
                    CodecError::Schema(format!("{name} has no field '{field_name}'"))
                })?;
            access.set(&instance, field, value)?;
        }
        Ok(instance)
    }

    /// Reads field `field_name` of `instance` through its registered type.
    pub fn read_field(&self, instance: &Object, field_name: &str) -> Result<Value> {
        let access = self
            .lookup(instance.type_name())
            .ok_or_else(|| CodecError::UnresolvableType(instance.type_name().to_string()))?;
        let field = access
            .desc()
            .fields()
            .iter()
            .find(|f| f.name() == field_name)
            .ok_or_else(|| {
                CodecError::Schema(format!(
                    "{} has no field '{field_name}'",
                    instance.type_name()
                ))
            })?;
        access.get(instance, field)
    }

    /// The enumerator `variant` of enum `name`.
    pub fn enumerator(&self, name: &str, variant: &str) -> Option<Enumerator> {
        let access = self.inner.named.read().get(name).cloned()?;
        let desc = access.desc();
        let ordinal = desc.variants().iter().position(|v| &**v == variant)?;
        Some(Enumerator::new(
            desc.shared_name().clone(),
            ordinal as u32,
            desc.variants()[ordinal].clone(),
        ))
    }

    fn structural(&self, ty: &TypeRef) -> AccessRef {
        if let Some(access) = self.inner.structural.read().get(ty) {
            return access.clone();
        }
        let kind = match ty {
            TypeRef::Primitive(kind) => TypeKind::Primitive(*kind),
            TypeRef::Array(component) => TypeKind::Array {
                component: (**component).clone(),
            },
            TypeRef::Map(key, value) => TypeKind::Map {
                key: (**key).clone(),
                value: (**value).clone(),
            },
            TypeRef::Any => TypeKind::Interface,
            TypeRef::Named(_) => TypeKind::Unknown,
        };
        let access: AccessRef = Arc::new(RegisteredAccess {
            registry: Arc::downgrade(&self.inner),
            desc: TypeDesc::new(ty.to_string(), kind),
        });
        self.inner
            .structural
            .write()
            .entry(ty.clone())
            .or_insert(access)
            .clone()
    }

    fn unknown(&self, name: Arc<str>) -> AccessRef {
        Arc::new(RegisteredAccess {
            registry: Arc::downgrade(&self.inner),
            desc: TypeDesc::new(name, TypeKind::Unknown),
        })
    }

    fn from_inner(inner: &Weak<RegistryInner>) -> Result<Self> {
        inner
            .upgrade()
            .map(|inner| Self { inner })
            .ok_or_else(|| CodecError::Schema("type registry was dropped".to_string()))
    }
}

/// Access served by a [`TypeRegistry`].
struct RegisteredAccess {
    registry: Weak<RegistryInner>,
    desc: TypeDesc,
}

impl fmt::Debug for RegisteredAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAccess")
            .field("type", &self.desc.name())
            .field("flavour", &self.desc.flavour())
            .finish()
    }
}

impl RegisteredAccess {
    fn check_instance(&self, instance: &Object) -> Result<()> {
        if instance.type_name() != self.desc.name() {
            return Err(CodecError::Encode(format!(
                "expected an instance of {}, got {}",
                self.desc.name(),
                instance.type_name()
            )));
        }
        Ok(())
    }
}

impl Access for RegisteredAccess {
    fn desc(&self) -> &TypeDesc {
        &self.desc
    }

    fn field_access(&self, field: &FieldDescriptor) -> Result<AccessRef> {
        TypeRegistry::from_inner(&self.registry)?.resolve(field.ty())
    }

    fn component_access(&self) -> Result<AccessRef> {
        let component = match self.desc.kind() {
            TypeKind::Array { component } => component,
            TypeKind::Map { value, .. } => value,
            _ => return Err(self.desc.unsupported()),
        };
        TypeRegistry::from_inner(&self.registry)?.resolve(component)
    }

    fn key_access(&self) -> Result<AccessRef> {
        match self.desc.kind() {
            TypeKind::Map { key, .. } => TypeRegistry::from_inner(&self.registry)?.resolve(key),
            _ => Err(self.desc.unsupported()),
        }
    }

    fn new_instance(&self) -> Result<Object> {
        match self.desc.kind() {
            TypeKind::Class { fields, .. } => Ok(Object::new(
                self.desc.shared_name().clone(),
                fields.len(),
            )),
            _ => Err(self.desc.unsupported()),
        }
    }

    fn get(&self, instance: &Object, field: &FieldDescriptor) -> Result<Value> {
        self.check_instance(instance)?;
        Ok(instance.get(field.index()))
    }

    fn set(&self, instance: &Object, field: &FieldDescriptor, value: Value) -> Result<()> {
        self.check_instance(instance)?;
        instance.set(field.index(), value);
        Ok(())
    }
}

/// Builder for a field of a [`ClassType`].
#[derive(Clone, Debug)]
pub struct Field {
    name: Arc<str>,
    number: u32,
    ty: TypeRef,
    optional: bool,
    default: Option<Value>,
    hints: Hints,
}

impl Field {
    /// A required field with wire number `number`.
    pub fn new(name: impl Into<Arc<str>>, number: u32, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            number,
            ty,
            optional: false,
            default: None,
            hints: Hints::default(),
        }
    }

    /// The field may be absent from the wire.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Value assumed when the field is absent; values equal to it are not
    /// written.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.insert(hint);
        self
    }

    /// Zigzag-encode this integer field.
    pub fn signed(self) -> Self {
        self.hint(HINT_SIGNED)
    }

    /// Fixed-width-encode this integer field.
    pub fn fixed(self) -> Self {
        self.hint(HINT_FIXED)
    }
}

/// Builder for a class description.
#[derive(Clone, Debug)]
pub struct ClassType {
    name: Arc<str>,
    fields: Vec<FieldDescriptor>,
    references: bool,
}

impl ClassType {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            references: false,
        }
    }

    /// Appends a field; its slot is its position in declaration order.
    pub fn field(mut self, field: Field) -> Self {
        let index = self.fields.len();
        self.fields.push(
            FieldDescriptor::new(field.name, field.number, index, field.ty)
                .with_optional(field.optional)
                .with_default(field.default)
                .with_hints(field.hints),
        );
        self
    }

    /// Deduplicate repeated occurrences of one instance by reference id.
    pub fn references(mut self, enabled: bool) -> Self {
        self.references = enabled;
        self
    }
}

impl From<ClassType> for TypeDesc {
    fn from(ty: ClassType) -> Self {
        TypeDesc::new(
            ty.name,
            TypeKind::Class {
                fields: ty.fields,
                references: ty.references,
            },
        )
    }
}

/// Builder for an enumeration; ordinals follow declaration order.
#[derive(Clone, Debug)]
pub struct EnumType {
    name: Arc<str>,
    variants: Vec<Arc<str>>,
}

impl EnumType {
    pub fn new<I, S>(name: impl Into<Arc<str>>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<EnumType> for TypeDesc {
    fn from(ty: EnumType) -> Self {
        TypeDesc::new(ty.name, TypeKind::Enum {
            variants: ty.variants,
        })
    }
}

/// An abstract type; fields of this type hold any-values.
#[derive(Clone, Debug)]
pub struct InterfaceType {
    name: Arc<str>,
}

impl InterfaceType {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

impl From<InterfaceType> for TypeDesc {
    fn from(ty: InterfaceType) -> Self {
        TypeDesc::new(ty.name, TypeKind::Interface)
    }
}

/// A callable; described for completeness, never encodable.
#[derive(Clone, Debug)]
pub struct MethodType {
    name: Arc<str>,
}

impl MethodType {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

impl From<MethodType> for TypeDesc {
    fn from(ty: MethodType) -> Self {
        TypeDesc::new(ty.name, TypeKind::Method)
    }
}
