//! Object reference tables.
//!
//! Classes registered with references enabled are written in full only the
//! first time an instance is met; later occurrences are written as the id the
//! instance was given. Ids are handed out in the order instances are *entered*
//! on both sides: the encoder assigns one before writing an instance's fields,
//! and the decoder registers an instance as soon as it is constructed, before
//! its fields are populated. A back-reference from inside an instance to one
//! of its ancestors therefore resolves to the still-incomplete ancestor.

use crate::value::{Object, Value};
use crate::{CodecError, Result};
use std::collections::HashMap;

/// Outcome of [`EncodeRefs::assign`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seen {
    /// First encounter; the instance now has this id.
    New(u64),
    /// Already written under this id.
    Existing(u64),
}

/// Encode-side identity table.
#[derive(Debug, Default)]
pub struct EncodeRefs {
    ids: HashMap<usize, u64>,
    // Keeps every keyed instance alive so its address cannot be reused.
    pinned: Vec<Object>,
}

impl EncodeRefs {
    /// Id of `instance` if it was already assigned one.
    pub fn lookup(&self, instance: &Object) -> Option<u64> {
        self.ids.get(&instance.addr()).copied()
    }

    /// Assigns the next id to `instance` unless it already has one.
    pub fn assign(&mut self, instance: &Object) -> Seen {
        if let Some(id) = self.lookup(instance) {
            return Seen::Existing(id);
        }
        let id = self.pinned.len() as u64;
        self.ids.insert(instance.addr(), id);
        self.pinned.push(instance.clone());
        Seen::New(id)
    }

    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }
}

/// Decode-side table: index is the id.
#[derive(Debug, Default)]
pub struct DecodeRefs {
    values: Vec<Value>,
}

impl DecodeRefs {
    /// Registers a freshly constructed instance under the next id.
    pub fn register(&mut self, value: Value) -> u64 {
        self.values.push(value);
        (self.values.len() - 1) as u64
    }

    /// # Errors
    /// [`CodecError::UnresolvableReference`] for an id not registered yet.
    pub fn resolve(&self, id: u64) -> Result<Value> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.values.get(index))
            .cloned()
            .ok_or(CodecError::UnresolvableReference {
                id,
                known: self.values.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
