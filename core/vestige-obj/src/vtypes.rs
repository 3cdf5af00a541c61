//! Structure descriptions and overlays.
//!
//! A [`VType`] gives one structure's declared size plus a `field name →
//! (offset, descriptor)` map, exactly the contract the external symbol
//! tooling produces. An [`Overlay`] is a sparse patch over a vtype map:
//! it may resize a type, retype or move individual fields, or append new
//! fields (which must then carry an explicit offset). Overlays compose
//! by deep merge with later-wins precedence at the leaves; resolution to
//! final layouts happens in [`compile`](crate::compile).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::object::{Object, StructView};

/// An element count, either fixed or computed from the enclosing
/// structure at materialization time (a sibling field holds the length).
#[derive(Clone)]
pub enum Count {
    Fixed(u64),
    Dependent(Arc<dyn Fn(&Object) -> u64 + Send + Sync>),
}

impl Count {
    /// The fixed count, if this is one.
    #[must_use]
    pub const fn fixed(&self) -> Option<u64> {
        match self {
            Self::Fixed(n) => Some(*n),
            Self::Dependent(_) => None,
        }
    }

    /// Resolve against the enclosing structure. A dependent count
    /// without a parent resolves to zero.
    #[must_use]
    pub fn resolve(&self, parent: Option<&StructView>) -> u64 {
        match self {
            Self::Fixed(n) => *n,
            Self::Dependent(f) => parent.map_or(0, |p| f(&Object::Struct(p.clone()))),
        }
    }
}

impl fmt::Debug for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "Count::Fixed({n})"),
            Self::Dependent(_) => f.write_str("Count::Dependent(..)"),
        }
    }
}

impl From<u64> for Count {
    fn from(n: u64) -> Self {
        Self::Fixed(n)
    }
}

/// What a field holds.
#[derive(Clone, Debug)]
pub enum TypeDescriptor {
    /// A primitive from the profile's native-type table.
    Primitive(String),
    /// Pointer to a target, dereferenced in the object's native
    /// (usually kernel virtual) address space.
    Pointer(Box<TypeDescriptor>),
    /// Inline array; elements materialize only when indexed.
    Array {
        count: Count,
        element: Box<TypeDescriptor>,
    },
    /// Bit range of a backing primitive.
    BitField {
        start_bit: u32,
        end_bit: u32,
        target: String,
    },
    /// A nested structure by name.
    Struct(String),
    /// NUL-terminated string in a fixed window.
    String { length: Count },
    /// Named values over a backing primitive.
    Enumeration {
        target: String,
        choices: BTreeMap<u64, String>,
    },
    /// Named bits over a backing primitive. `bitmap` names single
    /// bits and feeds the decoded-names string; `maskmap` names
    /// multi-bit ranges as `(start bit, width)` for the per-mask
    /// accessors.
    Flags {
        target: String,
        bitmap: BTreeMap<String, u32>,
        maskmap: BTreeMap<String, (u32, u32)>,
    },
    /// Explicitly typeless (pointer targets of unknown shape).
    Void,
}

impl TypeDescriptor {
    /// Convenience: pointer to a named structure.
    #[must_use]
    pub fn pointer_to(target: &str) -> Self {
        Self::Pointer(Box::new(Self::Struct(target.to_string())))
    }

    /// Convenience: primitive by name.
    #[must_use]
    pub fn primitive(name: &str) -> Self {
        Self::Primitive(name.to_string())
    }
}

/// One structure description: declared size plus field placements.
#[derive(Clone, Debug, Default)]
pub struct VType {
    pub size: u64,
    pub fields: BTreeMap<String, (u64, TypeDescriptor)>,
}

impl VType {
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self {
            size,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, offset: u64, descriptor: TypeDescriptor) -> Self {
        self.fields.insert(name.to_string(), (offset, descriptor));
        self
    }
}

/// The structure dictionary a profile is built from.
pub type VTypeMap = BTreeMap<String, VType>;

/// Sparse patch for one field.
#[derive(Clone, Debug, Default)]
pub struct FieldPatch {
    /// Replacement offset; `None` keeps the base offset.
    pub offset: Option<u64>,
    /// Replacement descriptor; `None` keeps the base descriptor.
    pub descriptor: Option<TypeDescriptor>,
}

/// Sparse patch for one type.
#[derive(Clone, Debug, Default)]
pub struct TypePatch {
    /// Replacement total size; `None` keeps the declared size.
    pub size: Option<u64>,
    pub fields: BTreeMap<String, FieldPatch>,
}

/// A sparse structure-description patch set.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    pub types: BTreeMap<String, TypePatch>,
}

impl Overlay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retype a field in place (offset kept from the base).
    #[must_use]
    pub fn retype_field(mut self, ty: &str, field: &str, descriptor: TypeDescriptor) -> Self {
        self.types
            .entry(ty.to_string())
            .or_default()
            .fields
            .insert(
                field.to_string(),
                FieldPatch {
                    offset: None,
                    descriptor: Some(descriptor),
                },
            );
        self
    }

    /// Add (or fully replace) a field with an explicit offset.
    #[must_use]
    pub fn place_field(
        mut self,
        ty: &str,
        field: &str,
        offset: u64,
        descriptor: TypeDescriptor,
    ) -> Self {
        self.types
            .entry(ty.to_string())
            .or_default()
            .fields
            .insert(
                field.to_string(),
                FieldPatch {
                    offset: Some(offset),
                    descriptor: Some(descriptor),
                },
            );
        self
    }

    /// Override a type's declared size.
    #[must_use]
    pub fn resize_type(mut self, ty: &str, size: u64) -> Self {
        self.types.entry(ty.to_string()).or_default().size = Some(size);
        self
    }

    /// Drop a pending patch for `ty` (a later profile generation may
    /// handle the type differently and wants the base back).
    pub fn remove_type(&mut self, ty: &str) {
        self.types.remove(ty);
    }

    /// Deep-merge `later` into `self`; `later` wins at every leaf.
    pub fn merge(&mut self, later: Self) {
        for (ty, patch) in later.types {
            let slot = self.types.entry(ty).or_default();
            if patch.size.is_some() {
                slot.size = patch.size;
            }
            for (field, fp) in patch.fields {
                let fslot = slot.fields.entry(field).or_default();
                if fp.offset.is_some() {
                    fslot.offset = fp.offset;
                }
                if fp.descriptor.is_some() {
                    fslot.descriptor = fp.descriptor;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_overlay_wins_at_the_leaf() {
        let mut first = Overlay::new()
            .place_field("t", "f", 4, TypeDescriptor::primitive("int"))
            .resize_type("t", 16);
        let second = Overlay::new().retype_field("t", "f", TypeDescriptor::primitive("long long"));
        first.merge(second);

        let patch = &first.types["t"];
        assert_eq!(patch.size, Some(16));
        let fp = &patch.fields["f"];
        // Offset survives from the first overlay, the type is replaced.
        assert_eq!(fp.offset, Some(4));
        assert!(matches!(
            fp.descriptor,
            Some(TypeDescriptor::Primitive(ref p)) if p == "long long"
        ));
    }

    #[test]
    fn count_resolution() {
        assert_eq!(Count::Fixed(5).resolve(None), 5);
        let dependent = Count::Dependent(Arc::new(|_| 42));
        assert_eq!(dependent.fixed(), None);
        assert_eq!(dependent.resolve(None), 0);
    }
}
