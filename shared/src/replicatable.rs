//! The capability set an object exposes to be replicated.
//!
//! The server keeps a registry of objects implementing [`Replicatable`]. Each
//! object reports a [`TypeTag`] that is constant for its type, carries an
//! [`InstanceTag`] the registry assigns exactly once, and knows how to append
//! its replicated fields to a [`FieldWriter`].

use std::fmt;

use crate::error::CodecError;
use crate::snapshot::Field;

/// Per-object identifier assigned by the registry on registration.
pub type InstanceTag = u32;

/// Instance tag of an object that has not been registered yet.
pub const UNINITIALIZED_INSTANCE: InstanceTag = 0;

/// Class-level identifier carried on the wire as the outer snapshot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(&'static str);

impl TypeTag {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// An object the registry can track and the snapshot codec can encode.
pub trait Replicatable {
    /// Identifier shared by every object of this type.
    fn type_tag(&self) -> TypeTag;

    /// The assigned instance tag, or [`UNINITIALIZED_INSTANCE`] before registration.
    fn instance_tag(&self) -> InstanceTag;

    /// Assigns the instance tag.
    ///
    /// Succeeds once per object lifetime. Returns `false` without side effects
    /// when the object already has a tag or when `instance_tag` is
    /// [`UNINITIALIZED_INSTANCE`].
    fn initialize_instance(&mut self, instance_tag: InstanceTag) -> bool;

    /// Appends this object's replicated fields in a fixed, type-defined order.
    fn encode(&self, fields: &mut FieldWriter) -> Result<(), CodecError>;
}

/// Storage for an instance tag that follows the one-shot initialization rule.
///
/// Application types embed one and forward [`Replicatable::instance_tag`] and
/// [`Replicatable::initialize_instance`] to it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSlot(InstanceTag);

impl InstanceSlot {
    pub const fn new() -> Self {
        Self(UNINITIALIZED_INSTANCE)
    }

    pub const fn get(self) -> InstanceTag {
        self.0
    }

    pub const fn is_initialized(self) -> bool {
        self.0 != UNINITIALIZED_INSTANCE
    }

    pub fn initialize(&mut self, instance_tag: InstanceTag) -> bool {
        if instance_tag == UNINITIALIZED_INSTANCE || self.is_initialized() {
            return false;
        }
        self.0 = instance_tag;
        true
    }
}

/// Collects the ordered field list of one object during encoding.
#[derive(Debug, Default)]
pub struct FieldWriter {
    fields: Vec<Field>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one field. Nested arrays and maps count as a single field.
    pub fn write(&mut self, value: impl Into<Field>) -> &mut Self {
        self.fields.push(value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }
}
