//! Codec selection and caching.
//!
//! [`CodecResolver::resolve`] maps an [`AccessRef`] (plus field hints) to a
//! [`Codec`]. Primitive codecs come straight from the static tables; every
//! other codec is built once per access and integer encoding and kept in the
//! [`CodecCache`] until evicted.
//!
//! Class and array codecs refer to their field/component codecs through
//! [`DeferredCodec`] slots, filled on first use. That is what lets a class
//! contain itself, directly or through other classes: building a codec never
//! recurses.

use crate::any::AnyCodec;
use crate::array::ArrayCodec;
use crate::buffer::WireBuffer;
use crate::class::ClassCodec;
use crate::config::Config;
use crate::encoder::EncodeContext;
use crate::primitive::{IntEncoding, PrimitiveCodec, PrimitiveCodecTable};
use crate::reader::{RawPayload, WireType};
use crate::registry::TypeRegistry;
use crate::types::{AccessRef, Flavour, Hints, TypeDesc, TypeKind, TypeRef};
use crate::value::{Enumerator, Value};
use crate::{CodecError, MalformedInput, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A resolved codec.
#[derive(Clone, Debug)]
pub enum Codec {
    Primitive(PrimitiveCodec),
    Enum(Arc<EnumCodec>),
    Class(Arc<ClassCodec>),
    Array(Arc<ArrayCodec>),
    Any(Arc<AnyCodec>),
}

impl Codec {
    pub fn flavour(&self) -> Flavour {
        match self {
            Codec::Primitive(_) => Flavour::Primitive,
            Codec::Enum(_) => Flavour::Enum,
            Codec::Class(_) => Flavour::Class,
            Codec::Array(_) => Flavour::Array,
            Codec::Any(_) => Flavour::Interface,
        }
    }

    /// Writes `value` as field `number` of the message being built.
    ///
    /// For an array codec this writes one field per element.
    pub(crate) fn encode_field(
        &self,
        ctx: &mut EncodeContext<'_>,
        number: u32,
        value: &Value,
    ) -> Result<()> {
        match self {
            Codec::Primitive(codec) => codec.encode_field(&mut ctx.buf, number, value),
            Codec::Enum(codec) => codec.encode_field(&mut ctx.buf, number, value),
            Codec::Class(codec) => codec.encode_field(ctx, number, value),
            Codec::Array(codec) => codec.encode_field(ctx, number, value),
            Codec::Any(codec) => codec.encode_field(ctx, number, value),
        }
    }

    /// Whether both are the same built codec.
    pub fn same(&self, other: &Codec) -> bool {
        match (self, other) {
            (Codec::Enum(a), Codec::Enum(b)) => Arc::ptr_eq(a, b),
            (Codec::Class(a), Codec::Class(b)) => Arc::ptr_eq(a, b),
            (Codec::Array(a), Codec::Array(b)) => Arc::ptr_eq(a, b),
            (Codec::Any(a), Codec::Any(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Empties the slots of this codec that hold a codec matching `stale`.
    fn unlink_where(&self, stale: &dyn Fn(&Codec) -> bool) {
        match self {
            Codec::Class(codec) => codec.unlink_where(stale),
            Codec::Array(codec) => codec.unlink_where(stale),
            _ => {}
        }
    }
}

/// Writes the ordinal of an enumerator as a varint.
pub struct EnumCodec {
    name: Arc<str>,
    variants: Vec<Arc<str>>,
}

impl fmt::Debug for EnumCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumCodec")
            .field("name", &self.name)
            .field("variants", &self.variants.len())
            .finish()
    }
}

impl EnumCodec {
    pub fn new(desc: &TypeDesc) -> Result<Self> {
        match desc.kind() {
            TypeKind::Enum { variants } => Ok(Self {
                name: desc.shared_name().clone(),
                variants: variants.clone(),
            }),
            _ => Err(desc.unsupported()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn encode_field(&self, buf: &mut WireBuffer, number: u32, value: &Value) -> Result<()> {
        let enumerator = match value {
            Value::Enum(e) if e.type_name() == &*self.name => e,
            other => {
                return Err(CodecError::Encode(format!(
                    "expected an enumerator of {}, got {other:?}",
                    self.name
                )))
            }
        };
        if enumerator.ordinal() as usize >= self.variants.len() {
            return Err(CodecError::Encode(format!(
                "{} has no enumerator with ordinal {}",
                self.name,
                enumerator.ordinal()
            )));
        }
        buf.put_tag(number, WireType::Varint);
        buf.put_varint(u64::from(enumerator.ordinal()));
        Ok(())
    }

    pub(crate) fn decode(&self, raw: &RawPayload) -> Result<Value> {
        let ordinal = raw.as_varint()?;
        let found = u32::try_from(ordinal)
            .ok()
            .and_then(|o| self.variants.get(o as usize).map(|name| (o, name)));
        match found {
            Some((o, name)) => Ok(Value::Enum(Enumerator::new(
                self.name.clone(),
                o,
                name.clone(),
            ))),
            None => Err(MalformedInput::UnknownEnumerator {
                type_name: self.name.to_string(),
                ordinal,
            }
            .into()),
        }
    }
}

/// A codec slot resolved on first use.
///
/// Once resolved, the slot keeps its codec until [`DeferredCodec::unlink`];
/// a failed resolution is not remembered, so registering a missing type
/// later makes the slot usable.
#[derive(Default)]
pub struct DeferredCodec {
    hints: Hints,
    resolved: RwLock<Option<Codec>>,
}

impl fmt::Debug for DeferredCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCodec")
            .field("hints", &self.hints)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl DeferredCodec {
    pub fn new(hints: Hints) -> Self {
        Self {
            hints,
            resolved: RwLock::new(None),
        }
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.read().is_some()
    }

    /// The codec in this slot, resolving it through `locate` if empty.
    pub fn ensure_resolved(
        &self,
        resolver: &CodecResolver,
        locate: impl FnOnce() -> Result<AccessRef>,
    ) -> Result<Codec> {
        if let Some(codec) = self.resolved.read().as_ref() {
            return Ok(codec.clone());
        }
        let codec = resolver.resolve(&locate()?, &self.hints)?;
        // Racing resolutions produce the same cached codec.
        *self.resolved.write() = Some(codec.clone());
        Ok(codec)
    }

    /// Empties the slot.
    pub fn unlink(&self) {
        self.unlink_where(&|_| true);
    }

    /// Empties the slot if its codec matches `stale`.
    pub fn unlink_where(&self, stale: &dyn Fn(&Codec) -> bool) {
        let previous = {
            let mut resolved = self.resolved.write();
            if matches!(resolved.as_ref(), Some(codec) if stale(codec)) {
                resolved.take()
            } else {
                None
            }
        };
        drop(previous);
    }
}

// Key: identity of the access, integer encoding.
type CacheKey = (usize, IntEncoding);

struct CacheEntry {
    // Holding the access keeps its address from being reused by another type.
    access: AccessRef,
    codec: Codec,
}

fn access_key(access: &AccessRef) -> usize {
    Arc::as_ptr(access) as *const () as usize
}

/// Concurrent cache of built codecs.
///
/// Codecs of recursive types point at each other through their
/// [`DeferredCodec`] slots; [`CodecCache::clear`] and the eviction methods
/// empty those slots so the cycle can be freed. Eviction also empties the
/// slots of the codecs that stay cached wherever they held an evicted codec,
/// so those re-resolve on next use.
#[derive(Default)]
pub struct CodecCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl fmt::Debug for CodecCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl CodecCache {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether a codec for `access` is cached under any encoding.
    pub fn contains(&self, access: &AccessRef) -> bool {
        let key = access_key(access);
        self.entries.read().keys().any(|(k, _)| *k == key)
    }

    fn get_or_insert_with(
        &self,
        access: &AccessRef,
        encoding: IntEncoding,
        build: impl FnOnce() -> Result<Codec>,
    ) -> Result<Codec> {
        let key = (access_key(access), encoding);
        if let Some(entry) = self.entries.read().get(&key) {
            return Ok(entry.codec.clone());
        }
        let codec = build()?;
        let mut entries = self.entries.write();
        let entry = entries.entry(key).or_insert_with(|| {
            debug!(
                type_name = access.desc().name(),
                flavour = ?codec.flavour(),
                ?encoding,
                "built codec"
            );
            CacheEntry {
                access: access.clone(),
                codec: codec.clone(),
            }
        });
        Ok(entry.codec.clone())
    }

    /// Drops every codec built for `access`.
    pub fn evict(&self, access: &AccessRef) -> usize {
        let key = access_key(access);
        self.remove_where(|k, _| k.0 == key)
    }

    /// Drops every codec built for a type named `name`.
    pub fn evict_named(&self, name: &str) -> usize {
        self.remove_where(|_, entry| entry.access.desc().name() == name)
    }

    /// Drops every cached codec.
    pub fn clear(&self) {
        let removed = self.remove_where(|_, _| true);
        debug!(removed, "cleared codec cache");
    }

    fn remove_where(&self, mut pred: impl FnMut(&CacheKey, &CacheEntry) -> bool) -> usize {
        let removed: Vec<CacheEntry> = {
            let mut entries = self.entries.write();
            let keys: Vec<CacheKey> = entries
                .iter()
                .filter(|(k, e)| pred(k, e))
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        if removed.is_empty() {
            return 0;
        }
        for entry in &removed {
            entry.codec.unlink_where(&|_| true);
        }
        let remaining: Vec<Codec> = self
            .entries
            .read()
            .values()
            .map(|entry| entry.codec.clone())
            .collect();
        let stale = |codec: &Codec| removed.iter().any(|entry| entry.codec.same(codec));
        for codec in &remaining {
            codec.unlink_where(&stale);
        }
        removed.len()
    }
}

/// Maps type accesses to codecs.
///
/// The cache is dropped as a whole once the registry replaces or removes a
/// named type.
#[derive(Debug)]
pub struct CodecResolver {
    registry: TypeRegistry,
    cache: CodecCache,
    config: Config,
    // Registry generation the cache was built against.
    generation: AtomicU64,
}

impl CodecResolver {
    pub fn new(registry: TypeRegistry, config: Config) -> Self {
        let generation = AtomicU64::new(registry.generation());
        Self {
            registry,
            cache: CodecCache::default(),
            config,
            generation,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CodecCache {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves the codec for `access` under `hints`.
    ///
    /// # Errors
    /// [`CodecError::UnsupportedFlavour`] for methods and unknown types, or
    /// [`CodecError::Schema`] for a malformed class description.
    pub fn resolve(&self, access: &AccessRef, hints: &Hints) -> Result<Codec> {
        self.sync_with_registry();
        let desc = access.desc();
        match desc.kind() {
            TypeKind::Primitive(kind) => {
                Ok(Codec::Primitive(PrimitiveCodecTable::lookup(*kind, hints)))
            }
            TypeKind::Enum { .. } => self.cache.get_or_insert_with(access, IntEncoding::Default, || {
                Ok(Codec::Enum(Arc::new(EnumCodec::new(desc)?)))
            }),
            TypeKind::Class { .. } => self.cache.get_or_insert_with(access, IntEncoding::Default, || {
                Ok(Codec::Class(Arc::new(ClassCodec::new(access.clone())?)))
            }),
            TypeKind::Array { .. } | TypeKind::Map { .. } => {
                let encoding = IntEncoding::from_hints(hints);
                self.cache.get_or_insert_with(access, encoding, || {
                    Ok(Codec::Array(Arc::new(ArrayCodec::new(access.clone(), hints.clone())?)))
                })
            }
            TypeKind::Interface => self.cache.get_or_insert_with(access, IntEncoding::Default, || {
                Ok(Codec::Any(Arc::new(AnyCodec::new(access.clone()))))
            }),
            TypeKind::Method | TypeKind::Unknown => Err(desc.unsupported()),
        }
    }

    fn sync_with_registry(&self) {
        let current = self.registry.generation();
        let seen = self.generation.load(Ordering::Acquire);
        if seen == current {
            return;
        }
        if self
            .generation
            .compare_exchange(seen, current, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(generation = current, "registry changed, dropping cached codecs");
            self.cache.clear();
        }
    }

    /// Resolves a type reference through the registry.
    pub fn resolve_type(&self, ty: &TypeRef, hints: &Hints) -> Result<Codec> {
        self.resolve(&self.registry.resolve(ty)?, hints)
    }

    /// Resolves the codec for an any-value's type tag.
    ///
    /// # Errors
    /// [`CodecError::UnresolvableType`] if nothing is registered under `tag`.
    pub fn resolve_tag(&self, tag: &str) -> Result<Codec> {
        let access = self
            .registry
            .lookup(tag)
            .ok_or_else(|| CodecError::UnresolvableType(tag.to_string()))?;
        self.resolve(&access, &Hints::default())
    }
}
