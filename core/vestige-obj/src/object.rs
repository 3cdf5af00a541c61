//! Typed views over an address space.
//!
//! An [`Object`] owns coordinates, never bytes: `(profile, address
//! space, offset)` plus enough type information to interpret what is
//! there. Field access re-reads the image on every call; pointers defer
//! their dereference; arrays materialize elements only when indexed.
//! Failures inside a chain collapse into the [`NoneObject`] variant,
//! which absorbs all further access (see [`crate::none`]).
//!
//! Views are cheap to clone (shared handles and integers) and safe to
//! hand across threads; the underlying layers serialize their own I/O.

use std::collections::BTreeMap;
use std::sync::Arc;

use vestige_aspace::DynAddressSpace;

use crate::native::{PackFormat, PrimitiveValue};
use crate::none::NoneObject;
use crate::profile::{Behavior, Profile};
use crate::vtypes::TypeDescriptor;

/// Shared coordinates of a materialized view.
#[derive(Clone)]
pub(crate) struct ViewCoords {
    pub profile: Arc<Profile>,
    /// Where this view's own bytes are read.
    pub aspace: DynAddressSpace,
    /// Where pointers found here dereference (usually the kernel AS).
    pub native: DynAddressSpace,
    pub offset: u64,
}

/// A structure view.
#[derive(Clone)]
pub struct StructView {
    pub(crate) coords: ViewCoords,
    pub(crate) type_name: Arc<str>,
    pub(crate) attached: Arc<BTreeMap<String, Object>>,
}

/// A primitive view; decodes on access.
#[derive(Clone)]
pub struct PrimitiveView {
    pub(crate) coords: ViewCoords,
    pub(crate) format: PackFormat,
}

/// A pointer view; dereferences on demand.
#[derive(Clone)]
pub struct PointerView {
    pub(crate) coords: ViewCoords,
    pub(crate) format: PackFormat,
    pub(crate) target: Arc<TypeDescriptor>,
}

/// An indexable array view.
#[derive(Clone)]
pub struct ArrayView {
    pub(crate) coords: ViewCoords,
    pub(crate) element: Arc<TypeDescriptor>,
    pub(crate) count: u64,
}

/// A masked bit range over a backing primitive.
#[derive(Clone)]
pub struct BitfieldView {
    pub(crate) coords: ViewCoords,
    pub(crate) format: PackFormat,
    pub(crate) start_bit: u32,
    pub(crate) end_bit: u32,
}

/// A value-to-name mapping over a backing primitive.
#[derive(Clone)]
pub struct EnumerationView {
    pub(crate) coords: ViewCoords,
    pub(crate) format: PackFormat,
    pub(crate) choices: Arc<BTreeMap<u64, String>>,
}

/// Named bits over a backing primitive: single bits for the decoded
/// names, named `(start, width)` ranges for the mask accessors.
#[derive(Clone)]
pub struct FlagsView {
    pub(crate) coords: ViewCoords,
    pub(crate) format: PackFormat,
    pub(crate) bitmap: Arc<BTreeMap<String, u32>>,
    pub(crate) maskmap: Arc<BTreeMap<String, (u32, u32)>>,
}

/// A NUL-terminated string in a fixed window.
#[derive(Clone)]
pub struct StringView {
    pub(crate) coords: ViewCoords,
    pub(crate) length: u64,
}

/// A materialized typed view, or the absorbing sentinel.
#[derive(Clone)]
pub enum Object {
    Struct(StructView),
    Primitive(PrimitiveView),
    Pointer(PointerView),
    Array(ArrayView),
    Bitfield(BitfieldView),
    Enumeration(EnumerationView),
    Flags(FlagsView),
    Str(StringView),
    None(NoneObject),
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Struct(view) => write!(f, "Struct({})", view.type_name),
            Self::Primitive(_) => write!(f, "Primitive"),
            Self::Pointer(_) => write!(f, "Pointer"),
            Self::Array(_) => write!(f, "Array"),
            Self::Bitfield(_) => write!(f, "Bitfield"),
            Self::Enumeration(_) => write!(f, "Enumeration"),
            Self::Flags(_) => write!(f, "Flags"),
            Self::Str(_) => write!(f, "Str"),
            Self::None(none) => write!(f, "None({})", none.reason()),
        }
    }
}

impl Object {
    /// Shorthand for a sentinel with a reason.
    #[must_use]
    pub fn none(reason: impl AsRef<str>) -> Self {
        Self::None(NoneObject::new(reason))
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None(_))
    }

    /// The sentinel's reason, if this is one.
    #[must_use]
    pub fn none_reason(&self) -> Option<&str> {
        match self {
            Self::None(none) => Some(none.reason()),
            _ => None,
        }
    }

    /// The view's own offset. Zero for the sentinel.
    #[must_use]
    pub fn offset(&self) -> u64 {
        match self.coords() {
            Some(coords) => coords.offset,
            None => 0,
        }
    }

    /// The structure type name, when this is a structure.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Struct(view) => Some(&view.type_name),
            _ => None,
        }
    }

    /// Access a named member.
    ///
    /// Structures resolve the field through their layout, then through
    /// any attached views (optional headers). Everything else absorbs
    /// into a sentinel.
    #[must_use]
    pub fn field(&self, name: &str) -> Self {
        match self {
            Self::Struct(view) => view.field(name),
            Self::None(none) => Self::None(none.chain(&format!("member {name}"))),
            _ => Self::none(format!("member {name} of a non-structure view")),
        }
    }

    /// Dereference a pointer in its native address space.
    #[must_use]
    pub fn deref(&self) -> Self {
        match self {
            Self::Pointer(view) => view.deref(None),
            Self::None(none) => Self::None(none.chain("dereference")),
            _ => Self::none("dereference of a non-pointer view"),
        }
    }

    /// Dereference a pointer into an explicit address space.
    #[must_use]
    pub fn deref_in(&self, aspace: &DynAddressSpace) -> Self {
        match self {
            Self::Pointer(view) => view.deref(Some(aspace)),
            Self::None(none) => Self::None(none.chain("dereference")),
            _ => Self::none("dereference of a non-pointer view"),
        }
    }

    /// Dereference a pointer, reinterpreting the target as `ty`.
    #[must_use]
    pub fn deref_as(&self, ty: &str) -> Self {
        match self {
            Self::Pointer(view) => view.deref_retyped(ty),
            Self::None(none) => Self::None(none.chain("dereference")),
            _ => Self::none("dereference of a non-pointer view"),
        }
    }

    /// Index an array element.
    #[must_use]
    pub fn index(&self, idx: u64) -> Self {
        match self {
            Self::Array(view) => view.index(idx),
            Self::None(none) => Self::None(none.chain(&format!("index {idx}"))),
            _ => Self::none("indexing a non-array view"),
        }
    }

    /// Array element count; zero elsewhere.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            Self::Array(view) => view.count,
            _ => 0,
        }
    }

    /// Reinterpret the same offset as another structure type.
    #[must_use]
    pub fn cast(&self, ty: &str) -> Self {
        match self.coords() {
            Some(coords) => crate::profile::materialize_struct(
                &coords.profile,
                ty,
                coords.offset,
                &coords.aspace,
                &coords.native,
            ),
            None => match self {
                Self::None(none) => Self::None(none.chain(&format!("cast to {ty}"))),
                _ => Self::none("cast of a view without coordinates"),
            },
        }
    }

    /// Materialize the structure containing this view: `ty` whose
    /// `member` sits at this view's offset.
    #[must_use]
    pub fn container_of(&self, ty: &str, member: &str) -> Self {
        let Some(coords) = self.coords() else {
            return match self {
                Self::None(none) => Self::None(none.chain(&format!("container {ty}"))),
                _ => Self::none("container of a view without coordinates"),
            };
        };
        match coords.profile.offset_of(ty, member) {
            Ok(member_offset) => crate::profile::materialize_struct(
                &coords.profile,
                ty,
                coords.offset.wrapping_sub(member_offset),
                &coords.aspace,
                &coords.native,
            ),
            Err(err) => Self::none(err.to_string()),
        }
    }

    /// Raw decoded value, when this view reads one and the read
    /// succeeds.
    #[must_use]
    pub fn value(&self) -> Option<PrimitiveValue> {
        match self {
            Self::Primitive(view) => view.read(),
            Self::Pointer(view) => view.read_target_address().map(PrimitiveValue::Unsigned),
            Self::Bitfield(view) => view.read().map(PrimitiveValue::Unsigned),
            Self::Enumeration(view) => view.read(),
            Self::Flags(view) => view.read(),
            _ => None,
        }
    }

    /// Lossy numeric conversion: failed reads and sentinels are zero,
    /// structures report their offset (their identity in the image).
    #[must_use]
    pub fn u64(&self) -> u64 {
        match self {
            Self::Struct(view) => view.coords.offset,
            Self::Str(_) | Self::Array(_) | Self::None(_) => 0,
            _ => self.value().map_or(0, PrimitiveValue::as_u64),
        }
    }

    #[must_use]
    pub fn i64(&self) -> i64 {
        match self {
            Self::Struct(view) => view.coords.offset as i64,
            Self::Str(_) | Self::Array(_) | Self::None(_) => 0,
            _ => self.value().map_or(0, PrimitiveValue::as_i64),
        }
    }

    /// Boolean conversion. Sentinels are false; pointers are true when
    /// they hold a nonzero target; structures when their offset is
    /// inside a present run.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None(_) => false,
            Self::Struct(view) => view.coords.aspace.is_valid(view.coords.offset),
            Self::Str(view) => !view.decode().is_empty(),
            Self::Array(view) => view.count > 0,
            _ => self.value().is_some_and(|v| v.as_u64() != 0),
        }
    }

    /// Whether the view's own offset is inside a present run.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.coords() {
            Some(coords) => coords.aspace.is_valid(coords.offset),
            None => false,
        }
    }

    /// Decoded text: strings decode their window, enumerations and
    /// flags their names; everything else is empty.
    #[must_use]
    pub fn string(&self) -> String {
        match self {
            Self::Str(view) => view.decode(),
            Self::Enumeration(view) => view.decode(),
            Self::Flags(view) => view.decode(),
            _ => String::new(),
        }
    }

    /// Named mask of a flags field: a `(start, width)` range from the
    /// mask map, or a single named bit.
    #[must_use]
    pub fn flag(&self, name: &str) -> Self {
        match self {
            Self::Flags(view) => view.flag(name),
            Self::None(none) => Self::None(none.chain(&format!("flag {name}"))),
            _ => Self::none("flag access on a non-flags view"),
        }
    }

    /// Object-type name per the attached header convention (the
    /// `TypeIndex` lookup); empty when unknown or inapplicable.
    #[must_use]
    pub fn object_type(&self) -> String {
        let Self::Struct(view) = self else {
            return String::new();
        };
        view.object_type()
    }

    /// The structure size, primitive width, string window, or array
    /// extent; zero when unknown.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Struct(view) => view
                .coords
                .profile
                .size_of(&view.type_name)
                .unwrap_or_default(),
            Self::Primitive(view) => view.format.size(),
            Self::Pointer(view) => view.format.size(),
            Self::Bitfield(view) => view.format.size(),
            Self::Enumeration(view) => view.format.size(),
            Self::Flags(view) => view.format.size(),
            Self::Str(view) => view.length,
            Self::Array(view) => view
                .coords
                .profile
                .descriptor_byte_size(&view.element)
                .map_or(0, |elem| elem * view.count),
            Self::None(_) => 0,
        }
    }

    pub(crate) fn coords(&self) -> Option<&ViewCoords> {
        match self {
            Self::Struct(view) => Some(&view.coords),
            Self::Primitive(view) => Some(&view.coords),
            Self::Pointer(view) => Some(&view.coords),
            Self::Array(view) => Some(&view.coords),
            Self::Bitfield(view) => Some(&view.coords),
            Self::Enumeration(view) => Some(&view.coords),
            Self::Flags(view) => Some(&view.coords),
            Self::Str(view) => Some(&view.coords),
            Self::None(_) => None,
        }
    }
}

impl StructView {
    pub(crate) fn field(&self, name: &str) -> Object {
        let layout = match self.coords.profile.layout(&self.type_name) {
            Ok(layout) => layout,
            Err(err) => return Object::none(err.to_string()),
        };
        if let Some(field) = layout.fields.get(name) {
            return materialize(
                &self.coords.profile,
                &field.descriptor,
                self.coords.offset + field.offset,
                &self.coords.aspace,
                &self.coords.native,
                Some(self),
            );
        }
        if let Some(attached) = self.attached.get(name) {
            return attached.clone();
        }
        Object::none(format!("{} has no member {name}", self.type_name))
    }

    pub(crate) fn object_type(&self) -> String {
        let Some(Behavior::OptionalHeaders(spec)) =
            self.coords.profile.behavior(&self.type_name)
        else {
            return String::new();
        };
        let index = self.field(&spec.type_index_field).u64();
        self.coords
            .profile
            .index_map_constant(&spec.type_map_constant)
            .and_then(|map| map.get(&index).cloned())
            .unwrap_or_default()
    }
}

impl PrimitiveView {
    fn read(&self) -> Option<PrimitiveValue> {
        let bytes = self
            .coords
            .aspace
            .read(self.coords.offset, self.format.size() as usize)
            .ok()?;
        self.format.decode(&bytes)
    }
}

impl PointerView {
    fn read_target_address(&self) -> Option<u64> {
        let bytes = self
            .coords
            .aspace
            .read(self.coords.offset, self.format.size() as usize)
            .ok()?;
        self.format.decode(&bytes).map(|v| v.as_u64())
    }

    fn deref(&self, aspace: Option<&DynAddressSpace>) -> Object {
        let Some(target_addr) = self.read_target_address() else {
            return Object::none(format!(
                "pointer at 0x{:X} could not be read",
                self.coords.offset
            ));
        };
        let target_space = aspace.unwrap_or(&self.coords.native).clone();
        materialize(
            &self.coords.profile,
            &self.target,
            target_addr,
            &target_space,
            &self.coords.native,
            None,
        )
    }

    fn deref_retyped(&self, ty: &str) -> Object {
        let Some(target_addr) = self.read_target_address() else {
            return Object::none(format!(
                "pointer at 0x{:X} could not be read",
                self.coords.offset
            ));
        };
        crate::profile::materialize_struct(
            &self.coords.profile,
            ty,
            target_addr,
            &self.coords.native,
            &self.coords.native,
        )
    }
}

impl ArrayView {
    fn index(&self, idx: u64) -> Object {
        if idx >= self.count {
            return Object::none(format!("index {idx} past array of {}", self.count));
        }
        let Some(elem_size) = self.coords.profile.descriptor_byte_size(&self.element) else {
            return Object::none("array element size is not statically known");
        };
        materialize(
            &self.coords.profile,
            &self.element,
            self.coords.offset + idx * elem_size,
            &self.coords.aspace,
            &self.coords.native,
            None,
        )
    }
}

impl BitfieldView {
    fn read(&self) -> Option<u64> {
        let bytes = self
            .coords
            .aspace
            .read(self.coords.offset, self.format.size() as usize)
            .ok()?;
        let raw = self.format.decode(&bytes)?.as_u64();
        let width = self.end_bit - self.start_bit;
        let mask = if width >= 64 { u64::MAX } else { (1 << width) - 1 };
        Some((raw >> self.start_bit) & mask)
    }
}

impl EnumerationView {
    fn read(&self) -> Option<PrimitiveValue> {
        let bytes = self
            .coords
            .aspace
            .read(self.coords.offset, self.format.size() as usize)
            .ok()?;
        self.format.decode(&bytes)
    }

    fn decode(&self) -> String {
        let Some(value) = self.read().map(|v| v.as_u64()) else {
            return String::new();
        };
        self.choices
            .get(&value)
            .cloned()
            .unwrap_or_else(|| format!("Unknown choice {value}"))
    }
}

impl FlagsView {
    fn read(&self) -> Option<PrimitiveValue> {
        let bytes = self
            .coords
            .aspace
            .read(self.coords.offset, self.format.size() as usize)
            .ok()?;
        self.format.decode(&bytes)
    }

    fn decode(&self) -> String {
        let Some(value) = self.read().map(|v| v.as_u64()) else {
            return String::new();
        };
        // BTreeMap iteration gives the sorted name order.
        let names: Vec<&str> = self
            .bitmap
            .iter()
            .filter(|&(_, &bit)| value & (1 << bit) != 0)
            .map(|(name, _)| name.as_str())
            .collect();
        names.join(", ")
    }

    fn flag(&self, name: &str) -> Object {
        // A known mask becomes a bit-range view over the same backing
        // primitive, so it re-reads the image like any other access.
        // Ranged masks come from the mask map; a bitmap name doubles
        // as a one-bit mask.
        let (start_bit, width) = if let Some(&(start, width)) = self.maskmap.get(name) {
            (start, width)
        } else if let Some(&bit) = self.bitmap.get(name) {
            (bit, 1)
        } else {
            return Object::none(format!("mask {name} not known"));
        };
        Object::Bitfield(BitfieldView {
            coords: self.coords.clone(),
            format: self.format,
            start_bit,
            end_bit: start_bit + width,
        })
    }
}

impl StringView {
    fn decode(&self) -> String {
        let Ok(bytes) = self
            .coords
            .aspace
            .read(self.coords.offset, self.length as usize)
        else {
            return String::new();
        };
        let terminated = bytes.split(|&b| b == 0).next().unwrap_or_default();
        String::from_utf8_lossy(terminated).into_owned()
    }
}

/// Materialize `desc` at `offset`. The profile decides structure
/// layouts and behaviors; `parent` feeds dependent counts.
pub(crate) fn materialize(
    profile: &Arc<Profile>,
    desc: &TypeDescriptor,
    offset: u64,
    aspace: &DynAddressSpace,
    native: &DynAddressSpace,
    parent: Option<&StructView>,
) -> Object {
    let coords = ViewCoords {
        profile: Arc::clone(profile),
        aspace: Arc::clone(aspace),
        native: Arc::clone(native),
        offset,
    };
    match desc {
        TypeDescriptor::Primitive(name) => match profile.native_format(name) {
            Some(format) => Object::Primitive(PrimitiveView { coords, format }),
            None => Object::none(format!("native type {name} is unknown")),
        },
        TypeDescriptor::Pointer(target) => match profile.native_format("pointer") {
            Some(format) => Object::Pointer(PointerView {
                coords,
                format,
                target: Arc::new((**target).clone()),
            }),
            None => Object::none("no pointer native type"),
        },
        TypeDescriptor::Array { count, element } => Object::Array(ArrayView {
            coords,
            element: Arc::new((**element).clone()),
            count: count.resolve(parent),
        }),
        TypeDescriptor::BitField {
            start_bit,
            end_bit,
            target,
        } => match profile.native_format(target) {
            Some(format) => Object::Bitfield(BitfieldView {
                coords,
                format,
                start_bit: *start_bit,
                end_bit: *end_bit,
            }),
            None => Object::none(format!("native type {target} is unknown")),
        },
        TypeDescriptor::Struct(name) => {
            crate::profile::materialize_struct(profile, name, offset, aspace, native)
        }
        TypeDescriptor::String { length } => Object::Str(StringView {
            length: length.resolve(parent),
            coords,
        }),
        TypeDescriptor::Enumeration { target, choices } => match profile.native_format(target) {
            Some(format) => Object::Enumeration(EnumerationView {
                coords,
                format,
                choices: Arc::new(choices.clone()),
            }),
            None => Object::none(format!("native type {target} is unknown")),
        },
        TypeDescriptor::Flags {
            target,
            bitmap,
            maskmap,
        } => match profile.native_format(target) {
            Some(format) => Object::Flags(FlagsView {
                coords,
                format,
                bitmap: Arc::new(bitmap.clone()),
                maskmap: Arc::new(maskmap.clone()),
            }),
            None => Object::none(format!("native type {target} is unknown")),
        },
        TypeDescriptor::Void => Object::none("void has no representation"),
    }
}
